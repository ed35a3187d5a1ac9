use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vmedia_core::{
    Drive, DriveInterface, DriveMediaManager, ImageType, ManagerSettings, MediaDevice,
    MediaError, MediaErrorKind, MediaEventType, MediaFormat, MediaInfo, MediaJournal,
    MediaLocation, MediaManager, MediaProbe, MediaState, Result, VmPowerState, VmediaError,
};

#[derive(Debug, Clone, PartialEq)]
enum DeviceCall {
    Change(String, String),
    Eject(String),
}

#[derive(Default)]
struct FakeDevice {
    calls: Mutex<Vec<DeviceCall>>,
    delay: Option<Duration>,
    reject: bool,
}

impl FakeDevice {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaDevice for FakeDevice {
    async fn change_medium(&self, drive: &Drive, media: &MediaInfo) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject {
            return Err(VmediaError::PlatformError {
                platform: "fake".to_string(),
                message: "unsupported medium".to_string(),
                recoverable: true,
            });
        }
        self.calls.lock().unwrap().push(DeviceCall::Change(
            drive.id.clone(),
            media.location.to_string(),
        ));
        Ok(())
    }

    async fn eject(&self, drive: &Drive) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject {
            return Err(MediaError::DeviceRejected {
                drive_id: drive.id.clone(),
                reason: "tray locked".to_string(),
            }
            .into());
        }
        self.calls
            .lock()
            .unwrap()
            .push(DeviceCall::Eject(drive.id.clone()));
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

#[derive(Default)]
struct FakeProbe {
    unreadable: HashSet<String>,
    delay: Option<Duration>,
}

#[async_trait]
impl MediaProbe for FakeProbe {
    async fn probe(&self, location: &MediaLocation) -> Result<MediaInfo> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreadable.contains(location.as_str()) {
            return Err(MediaError::UnreadableResource {
                location: location.to_string(),
                reason: "No such file or directory".to_string(),
            }
            .into());
        }
        Ok(MediaInfo {
            location: location.clone(),
            path: PathBuf::from(location.as_str()),
            format: MediaFormat::Raw,
            size_bytes: 1024,
            read_only: false,
        })
    }
}

fn test_drives() -> Vec<Drive> {
    vec![
        Drive::new("D1", ImageType::Cd, DriveInterface::Ide).removable(),
        Drive::new("D2", ImageType::Disk, DriveInterface::VirtIo).with_media("/vms/base.img"),
        Drive::new("D3", ImageType::Disk, DriveInterface::Usb).removable(),
        Drive::new("fw", ImageType::Bios, DriveInterface::None).with_media("/vms/bios.bin"),
    ]
}

fn running_manager(device: Arc<FakeDevice>) -> DriveMediaManager {
    DriveMediaManager::builder(
        "test-vm",
        test_drives(),
        device,
        Arc::new(FakeProbe::default()),
    )
    .power_state(VmPowerState::Running)
    .build()
    .unwrap()
}

fn binding(manager: &DriveMediaManager, drive_id: &str) -> MediaState {
    manager
        .drives()
        .into_iter()
        .find(|d| d.id == drive_id)
        .unwrap()
        .state()
}

fn media_kind(result: Result<impl Sized>) -> Option<MediaErrorKind> {
    match result {
        Err(VmediaError::Media(e)) => Some(e.kind()),
        _ => None,
    }
}

#[tokio::test]
async fn test_optical_swap_then_eject_updates_label() -> Result<()> {
    let device = Arc::new(FakeDevice::default());
    let manager = running_manager(device.clone());

    manager.swap_media("D1", "disk1.iso".into()).await?;
    let label = manager.current_label("D1")?.label();
    assert!(label.ends_with(": disk1.iso"), "label was {label}");

    manager.eject("D1").await?;
    let label = manager.current_label("D1")?.label();
    assert!(label.ends_with(": none"), "label was {label}");

    assert_eq!(
        device.calls(),
        vec![
            DeviceCall::Change("D1".to_string(), "disk1.iso".to_string()),
            DeviceCall::Eject("D1".to_string()),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_internal_drive_rejects_mutation() {
    let device = Arc::new(FakeDevice::default());
    let manager = running_manager(device.clone());
    let before = binding(&manager, "D2");

    let result = manager.swap_media("D2", "x.img".into()).await;
    assert_eq!(media_kind(result), Some(MediaErrorKind::NotExternal));

    let result = manager.eject("D2").await;
    assert_eq!(media_kind(result), Some(MediaErrorKind::NotExternal));

    assert_eq!(binding(&manager, "D2"), before);
    assert!(device.calls().is_empty());
    assert_eq!(manager.version(), 0);
}

#[tokio::test]
async fn test_eject_empty_drive_is_noop() -> Result<()> {
    let device = Arc::new(FakeDevice::default());
    let manager = running_manager(device.clone());

    manager.eject("D1").await?;
    manager.eject("D1").await?;

    assert_eq!(binding(&manager, "D1"), MediaState::Empty);
    assert!(device.calls().is_empty());
    assert_eq!(manager.version(), 0);
    Ok(())
}

#[tokio::test]
async fn test_same_drive_second_swap_is_busy() -> Result<()> {
    let device = Arc::new(FakeDevice::with_delay(Duration::from_millis(50)));
    let manager = running_manager(device.clone());

    let first = manager.spawn_swap("D1", "first.iso");
    let second = manager.spawn_swap("D1", "second.iso");

    assert!(second.is_finished());
    assert_eq!(media_kind(second.wait().await), Some(MediaErrorKind::Busy));

    first.wait().await?;
    assert_eq!(
        binding(&manager, "D1"),
        MediaState::Bound(MediaLocation::new("first.iso"))
    );
    assert_eq!(device.calls().len(), 1);

    // Token is released once the first change completes.
    manager.swap_media("D1", "second.iso".into()).await?;
    assert_eq!(
        binding(&manager, "D1"),
        MediaState::Bound(MediaLocation::new("second.iso"))
    );
    Ok(())
}

#[tokio::test]
async fn test_different_drives_run_concurrently() -> Result<()> {
    let device = Arc::new(FakeDevice::with_delay(Duration::from_millis(30)));
    let manager = running_manager(device.clone());

    let cd = manager.spawn_swap("D1", "a.iso");
    let usb = manager.spawn_swap("D3", "b.img");

    cd.wait().await?;
    usb.wait().await?;

    assert_eq!(manager.version(), 2);
    assert_eq!(binding(&manager, "D1"), MediaState::Bound("a.iso".into()));
    assert_eq!(binding(&manager, "D3"), MediaState::Bound("b.img".into()));
    Ok(())
}

#[tokio::test]
async fn test_swap_eject_swap_round_trip() -> Result<()> {
    let manager = running_manager(Arc::new(FakeDevice::default()));

    manager.swap_media("D1", "loc.iso".into()).await?;
    manager.eject("D1").await?;
    assert_eq!(binding(&manager, "D1"), MediaState::Empty);
    manager.swap_media("D1", "loc.iso".into()).await?;

    assert_eq!(binding(&manager, "D1"), MediaState::Bound("loc.iso".into()));
    Ok(())
}

#[tokio::test]
async fn test_device_rejection_leaves_state_unchanged() -> Result<()> {
    let device = Arc::new(FakeDevice::rejecting());
    let manager = DriveMediaManager::builder(
        "test-vm",
        vec![Drive::new("D1", ImageType::Cd, DriveInterface::Ide)
            .removable()
            .with_media("old.iso")],
        device,
        Arc::new(FakeProbe::default()),
    )
    .power_state(VmPowerState::Running)
    .build()?;
    let mut failures = manager.subscribe(vec!["media.failed".to_string()]);

    let result = manager.swap_media("D1", "new.iso".into()).await;
    assert_eq!(media_kind(result), Some(MediaErrorKind::DeviceRejected));
    assert_eq!(binding(&manager, "D1"), MediaState::Bound("old.iso".into()));

    let event = failures.recv().await.unwrap();
    assert_eq!(event.event_type, MediaEventType::Failed);
    assert_eq!(event.location, Some(MediaLocation::new("new.iso")));
    let notice = event.notice.unwrap();
    assert_eq!(notice.kind, MediaErrorKind::DeviceRejected);
    assert!(notice.message.contains("unsupported medium"));

    // A media error returned by the device passes through unchanged.
    let result = manager.eject("D1").await;
    match result {
        Err(VmediaError::Media(MediaError::DeviceRejected { reason, .. })) => {
            assert_eq!(reason, "tray locked")
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(binding(&manager, "D1"), MediaState::Bound("old.iso".into()));
    assert_eq!(manager.version(), 0);
    Ok(())
}

#[tokio::test]
async fn test_unreadable_resource() {
    let device = Arc::new(FakeDevice::default());
    let probe = FakeProbe {
        unreadable: HashSet::from(["missing.iso".to_string()]),
        ..Default::default()
    };
    let manager = DriveMediaManager::builder("test-vm", test_drives(), device.clone(), Arc::new(probe))
        .power_state(VmPowerState::Running)
        .build()
        .unwrap();

    let result = manager.swap_media("D1", "missing.iso".into()).await;
    assert_eq!(media_kind(result), Some(MediaErrorKind::UnreadableResource));
    assert_eq!(binding(&manager, "D1"), MediaState::Empty);
    assert!(device.calls().is_empty());
}

#[tokio::test]
async fn test_device_timeout() {
    let device = Arc::new(FakeDevice::with_delay(Duration::from_secs(5)));
    let manager = DriveMediaManager::builder(
        "test-vm",
        test_drives(),
        device,
        Arc::new(FakeProbe::default()),
    )
    .power_state(VmPowerState::Running)
    .settings(ManagerSettings {
        device_timeout: Duration::from_millis(20),
        probe_timeout: Duration::from_secs(1),
    })
    .build()
    .unwrap();

    let result = manager.swap_media("D1", "slow.iso".into()).await;
    assert_eq!(media_kind(result), Some(MediaErrorKind::Timeout));
    assert_eq!(binding(&manager, "D1"), MediaState::Empty);

    // The token is free again after a timeout.
    let result = manager.swap_media("D1", "slow.iso".into()).await;
    assert_eq!(media_kind(result), Some(MediaErrorKind::Timeout));
}

#[tokio::test]
async fn test_powered_off_swap_is_deferred_to_boot() -> Result<()> {
    let device = Arc::new(FakeDevice::rejecting());
    let manager = DriveMediaManager::builder(
        "test-vm",
        test_drives(),
        device,
        Arc::new(FakeProbe::default()),
    )
    .build()?;
    assert_eq!(manager.power_state(), VmPowerState::Stopped);

    manager.swap_media("D1", "install.iso".into()).await?;

    let bindings = manager.boot_bindings();
    assert_eq!(bindings.len(), 4);
    assert_eq!(
        bindings[0],
        ("D1".to_string(), Some(MediaLocation::new("install.iso")))
    );

    // Once live, the device is consulted and may refuse.
    manager.set_power_state(VmPowerState::Running);
    let result = manager.eject("D1").await;
    assert_eq!(media_kind(result), Some(MediaErrorKind::DeviceRejected));
    Ok(())
}

#[tokio::test]
async fn test_unknown_drive_is_precondition_failure() {
    let manager = running_manager(Arc::new(FakeDevice::default()));

    let result = manager.swap_media("nope", "a.iso".into()).await;
    assert!(matches!(result, Err(VmediaError::UnknownDrive { .. })));

    let result = manager.spawn_eject("nope").wait().await;
    assert!(matches!(result, Err(VmediaError::UnknownDrive { .. })));

    assert!(matches!(
        manager.current_label("nope"),
        Err(VmediaError::UnknownDrive { .. })
    ));
}

#[tokio::test]
async fn test_watch_observes_commits() -> Result<()> {
    let manager = running_manager(Arc::new(FakeDevice::default()));
    let mut watcher = manager.watch();
    let mut events = manager.subscribe(vec!["media.*".to_string()]);

    let task = manager.spawn_swap("D3", "data.img");
    watcher.changed().await.unwrap();
    let table = watcher.borrow_and_update().clone();
    assert_eq!(table.version, 1);
    assert_eq!(
        table.get("D3").unwrap().bound_media,
        Some(MediaLocation::new("data.img"))
    );
    task.wait().await?;

    let event = events.recv().await.unwrap();
    assert_eq!(event.event_type, MediaEventType::Changed);
    assert_eq!(event.version, 1);

    manager.eject("D3").await?;
    let event = events.recv().await.unwrap();
    assert_eq!(event.event_type, MediaEventType::Ejected);
    assert_eq!(event.version, 2);
    Ok(())
}

#[tokio::test]
async fn test_menu_lists_removable_and_fixed_disks() {
    let manager = running_manager(Arc::new(FakeDevice::default()));
    let menu = manager.menu();

    let ids: Vec<&str> = menu.iter().map(|d| d.drive_id.as_str()).collect();
    assert_eq!(ids, vec!["D1", "D2", "D3"]);
    assert!(menu[0].enabled);
    assert!(!menu[1].enabled);
    assert_eq!(menu[1].label(), "Disk Image (VirtIO): base.img");
}

#[tokio::test]
async fn test_bindings_persist_across_sessions() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let state_file = dir.path().join("state/test-vm.json");

    let manager = DriveMediaManager::builder(
        "test-vm",
        test_drives(),
        Arc::new(FakeDevice::default()),
        Arc::new(FakeProbe::default()),
    )
    .state_file(state_file.clone())
    .build()?;
    manager.swap_media("D1", "saved.iso".into()).await?;
    assert!(state_file.exists());

    let restored = DriveMediaManager::builder(
        "test-vm",
        test_drives(),
        Arc::new(FakeDevice::default()),
        Arc::new(FakeProbe::default()),
    )
    .state_file(state_file.clone())
    .build()?;
    restored.load_state().await?;

    assert_eq!(binding(&restored, "D1"), MediaState::Bound("saved.iso".into()));
    assert_eq!(binding(&restored, "D3"), MediaState::Empty);
    assert_eq!(
        binding(&restored, "D2"),
        MediaState::Bound("/vms/base.img".into())
    );
    assert_eq!(restored.version(), 1);

    let content = std::fs::read_to_string(&state_file)?;
    assert!(!content.contains("base.img"));
    Ok(())
}

#[tokio::test]
async fn test_journal_records_changes_and_failures() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let journal = MediaJournal::new("test-vm".to_string(), dir.path().join("test-vm.log"));
    journal.init().await?;

    let manager = DriveMediaManager::builder(
        "test-vm",
        test_drives(),
        Arc::new(FakeDevice::default()),
        Arc::new(FakeProbe {
            unreadable: HashSet::from(["gone.iso".to_string()]),
            ..Default::default()
        }),
    )
    .power_state(VmPowerState::Running)
    .journal(journal)
    .build()?;

    manager.swap_media("D1", "/isos/a.iso".into()).await?;
    let _ = manager.swap_media("D1", "gone.iso".into()).await;
    manager.eject("D1").await?;

    let lines = MediaJournal::new("test-vm".to_string(), dir.path().join("test-vm.log"))
        .read(None)
        .await?;
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("D1 <- /isos/a.iso"));
    assert!(lines[1].contains("unreadable_resource"));
    assert!(lines[2].contains("D1 ejected"));
    Ok(())
}

#[tokio::test]
async fn test_probe_timeout() -> Result<()> {
    let device = Arc::new(FakeDevice::default());
    let probe = FakeProbe {
        delay: Some(Duration::from_secs(5)),
        ..Default::default()
    };
    let manager = DriveMediaManager::builder("test-vm", test_drives(), device.clone(), Arc::new(probe))
        .power_state(VmPowerState::Running)
        .settings(ManagerSettings {
            device_timeout: Duration::from_secs(1),
            probe_timeout: Duration::from_millis(20),
        })
        .build()?;

    let result = manager.swap_media("D1", "stuck.iso".into()).await;
    assert_eq!(media_kind(result), Some(MediaErrorKind::Timeout));
    assert_eq!(binding(&manager, "D1"), MediaState::Empty);
    assert!(device.calls().is_empty());
    assert_eq!(manager.version(), 0);

    // The token was released, so the drive can still be ejected.
    manager.eject("D1").await?;
    Ok(())
}

#[tokio::test]
async fn test_dropped_caller_still_persists_and_announces() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let state_file = dir.path().join("test-vm.json");
    let manager = DriveMediaManager::builder(
        "test-vm",
        test_drives(),
        Arc::new(FakeDevice::default()),
        Arc::new(FakeProbe::default()),
    )
    .power_state(VmPowerState::Running)
    .state_file(state_file.clone())
    .build()?;
    let mut watcher = manager.watch();
    let mut events = manager.subscribe(vec!["media.changed".to_string()]);

    // Give up on the change as soon as the new table is visible.
    tokio::select! {
        _ = manager.swap_media("D1", "a.iso".into()) => {}
        _ = watcher.changed() => {}
    }
    assert_eq!(manager.version(), 1);

    let event = events.recv().await.unwrap();
    assert_eq!(event.event_type, MediaEventType::Changed);
    assert_eq!(event.location, Some(MediaLocation::new("a.iso")));

    let content = std::fs::read_to_string(&state_file)?;
    assert!(content.contains("a.iso"));
    Ok(())
}

#[tokio::test]
async fn test_load_state_waits_for_change_in_flight() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let state_file = dir.path().join("test-vm.json");
    std::fs::write(
        &state_file,
        r#"{"vm_name":"test-vm","bindings":{"D1":"persisted.iso","D3":null}}"#,
    )?;

    let manager = DriveMediaManager::builder(
        "test-vm",
        test_drives(),
        Arc::new(FakeDevice::with_delay(Duration::from_millis(50))),
        Arc::new(FakeProbe::default()),
    )
    .power_state(VmPowerState::Running)
    .state_file(state_file.clone())
    .build()?;

    let change = manager.spawn_swap("D1", "new.iso");
    manager.load_state().await?;

    // The restore ran after the change was saved, so it read the new binding.
    change.wait().await?;
    assert_eq!(binding(&manager, "D1"), MediaState::Bound("new.iso".into()));
    assert_eq!(manager.version(), 1);
    Ok(())
}

#[test]
fn test_zero_device_timeout_rejected() {
    let result = DriveMediaManager::builder(
        "test-vm",
        test_drives(),
        Arc::new(FakeDevice::default()),
        Arc::new(FakeProbe::default()),
    )
    .settings(ManagerSettings {
        device_timeout: Duration::ZERO,
        probe_timeout: Duration::from_secs(1),
    })
    .build();
    assert!(matches!(result, Err(VmediaError::ConfigError(_))));
}
