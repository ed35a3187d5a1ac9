use crate::output::{OutputFormat, OutputFormatter, print_info};
use vmedia_core::{Config, MediaJournal, Result};

pub async fn execute(
    vm: String,
    tail: Option<usize>,
    config: Config,
    format: OutputFormat,
) -> Result<()> {
    config.vm(&vm)?;
    let journal = MediaJournal::for_vm(&vm);
    let lines = journal.read(tail).await?;

    match format {
        OutputFormat::Table => {
            if lines.is_empty() {
                print_info(&format!("No media changes recorded for '{vm}'"));
            }
            for line in lines {
                println!("{line}");
            }
        }
        _ => println!("{}", format.format(lines)),
    }

    Ok(())
}
