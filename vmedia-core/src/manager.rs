use crate::config::{ManagerSettings, VmConfig};
use crate::error::*;
use crate::events::{EventBus, EventSubscriber, MediaEvent};
use crate::journal::MediaJournal;
use crate::types::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Operations a presentation layer drives.
#[async_trait]
pub trait MediaManager: Send + Sync {
    async fn swap_media(&self, drive_id: &str, location: MediaLocation) -> Result<DriveSnapshot>;
    async fn eject(&self, drive_id: &str) -> Result<DriveSnapshot>;
    fn current_label(&self, drive_id: &str) -> Result<DisplayDescriptor>;
    fn menu(&self) -> Vec<DisplayDescriptor>;
}

/// Owns the drives of one VM session and serializes media changes per drive.
///
/// A second mutation for a drive that already has one in flight is rejected
/// with [`MediaError::Busy`]; it is never queued. Mutations on different
/// drives run independently.
#[derive(Clone)]
pub struct DriveMediaManager {
    inner: Arc<Inner>,
}

struct Inner {
    vm_name: String,
    tokens: HashMap<String, Arc<Mutex<()>>>,
    table: watch::Sender<DriveSnapshot>,
    power: watch::Sender<VmPowerState>,
    device: Arc<dyn MediaDevice>,
    probe: Arc<dyn MediaProbe>,
    events: EventBus,
    settings: ManagerSettings,
    state_file: Option<PathBuf>,
    persist_lock: Mutex<()>,
    journal: Option<MediaJournal>,
}

/// Exclusive right to mutate one drive. Released on drop.
struct DriveToken {
    drive: Drive,
    _guard: OwnedMutexGuard<()>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedBindings {
    vm_name: String,
    bindings: BTreeMap<String, Option<MediaLocation>>,
}

pub struct DriveMediaManagerBuilder {
    vm_name: String,
    drives: Vec<Drive>,
    device: Arc<dyn MediaDevice>,
    probe: Arc<dyn MediaProbe>,
    power: VmPowerState,
    settings: ManagerSettings,
    state_file: Option<PathBuf>,
    journal: Option<MediaJournal>,
    events: Option<EventBus>,
}

impl DriveMediaManagerBuilder {
    pub fn power_state(mut self, power: VmPowerState) -> Self {
        self.power = power;
        self
    }

    pub fn settings(mut self, settings: ManagerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn state_file(mut self, path: PathBuf) -> Self {
        self.state_file = Some(path);
        self
    }

    pub fn journal(mut self, journal: MediaJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<DriveMediaManager> {
        VmConfig {
            name: self.vm_name.clone(),
            power: self.power,
            backend: Default::default(),
            drives: self.drives.clone(),
        }
        .validate()?;
        self.settings.validate()?;

        let tokens = self
            .drives
            .iter()
            .filter(|d| d.is_external)
            .map(|d| (d.id.clone(), Arc::new(Mutex::new(()))))
            .collect();

        let (table, _) = watch::channel(Arc::new(DriveTable {
            vm_name: self.vm_name.clone(),
            version: 0,
            drives: self.drives,
        }));
        let (power, _) = watch::channel(self.power);

        Ok(DriveMediaManager {
            inner: Arc::new(Inner {
                vm_name: self.vm_name,
                tokens,
                table,
                power,
                device: self.device,
                probe: self.probe,
                events: self.events.unwrap_or_default(),
                settings: self.settings,
                state_file: self.state_file,
                persist_lock: Mutex::new(()),
                journal: self.journal,
            }),
        })
    }
}

impl DriveMediaManager {
    pub fn builder(
        vm_name: &str,
        drives: Vec<Drive>,
        device: Arc<dyn MediaDevice>,
        probe: Arc<dyn MediaProbe>,
    ) -> DriveMediaManagerBuilder {
        DriveMediaManagerBuilder {
            vm_name: vm_name.to_string(),
            drives,
            device,
            probe,
            power: VmPowerState::Stopped,
            settings: ManagerSettings::default(),
            state_file: None,
            journal: None,
            events: None,
        }
    }

    pub fn from_config(
        vm: &VmConfig,
        device: Arc<dyn MediaDevice>,
        probe: Arc<dyn MediaProbe>,
    ) -> DriveMediaManagerBuilder {
        Self::builder(&vm.name, vm.drives.clone(), device, probe).power_state(vm.power)
    }

    pub fn vm_name(&self) -> &str {
        &self.inner.vm_name
    }

    pub fn device_name(&self) -> &str {
        self.inner.device.name()
    }

    /// Current snapshot of every drive, in configuration order.
    pub fn snapshot(&self) -> DriveSnapshot {
        self.inner.table.borrow().clone()
    }

    pub fn drives(&self) -> Vec<Drive> {
        self.snapshot().drives.clone()
    }

    pub fn version(&self) -> u64 {
        self.inner.table.borrow().version
    }

    /// Receiver that observes every published drive table.
    pub fn watch(&self) -> watch::Receiver<DriveSnapshot> {
        self.inner.table.subscribe()
    }

    pub fn subscribe(&self, filters: Vec<String>) -> EventSubscriber {
        self.inner.events.subscribe(filters)
    }

    pub fn power_state(&self) -> VmPowerState {
        *self.inner.power.borrow()
    }

    pub fn set_power_state(&self, state: VmPowerState) {
        let previous = self.inner.power.send_replace(state);
        if previous != state {
            info!(
                "VM {} power state {:?} -> {:?}",
                self.inner.vm_name, previous, state
            );
        }
    }

    /// Bindings a launcher attaches when the VM boots.
    pub fn boot_bindings(&self) -> Vec<(String, Option<MediaLocation>)> {
        self.snapshot()
            .drives
            .iter()
            .map(|d| (d.id.clone(), d.bound_media.clone()))
            .collect()
    }

    /// Start a swap in the background. The drive is claimed before this
    /// returns, so a second call for the same drive is rejected as busy.
    pub fn spawn_swap(&self, drive_id: &str, location: impl Into<MediaLocation>) -> MediaTask {
        let location = location.into();
        match self.claim(drive_id, Some(&location)) {
            Ok(token) => {
                let manager = self.clone();
                MediaTask::spawn(async move { manager.run_swap(token, location).await })
            }
            Err(e) => MediaTask::ready(Err(e)),
        }
    }

    pub fn spawn_eject(&self, drive_id: &str) -> MediaTask {
        match self.claim(drive_id, None) {
            Ok(token) => {
                let manager = self.clone();
                MediaTask::spawn(async move { manager.run_eject(token).await })
            }
            Err(e) => MediaTask::ready(Err(e)),
        }
    }

    /// Restore persisted bindings of removable drives.
    ///
    /// Every removable drive's token is held while the file is read and
    /// applied, so a restore waits for changes in flight and never races one.
    pub async fn load_state(&self) -> Result<()> {
        let Some(state_file) = &self.inner.state_file else {
            return Ok(());
        };

        let mut guards = Vec::with_capacity(self.inner.tokens.len());
        for drive in self.snapshot().drives.iter().filter(|d| d.is_external) {
            if let Some(token) = self.inner.tokens.get(&drive.id) {
                guards.push(token.clone().lock_owned().await);
            }
        }

        if !fs::try_exists(state_file).await? {
            return Ok(());
        }

        let content = fs::read_to_string(state_file).await?;
        let persisted: PersistedBindings = serde_json::from_str(&content)?;

        let mut restored = 0;
        self.inner.table.send_if_modified(|table| {
            let mut next = (**table).clone();
            for drive in next.drives.iter_mut() {
                match persisted.bindings.get(&drive.id) {
                    Some(binding) if drive.is_external => {
                        if drive.bound_media != *binding {
                            drive.bound_media = binding.clone();
                            restored += 1;
                        }
                    }
                    Some(_) => warn!("Ignoring persisted binding for fixed drive {}", drive.id),
                    None => {}
                }
            }
            if restored == 0 {
                return false;
            }
            next.version += 1;
            *table = Arc::new(next);
            true
        });

        debug!(
            "Restored {} media bindings for VM {} from {:?}",
            restored, self.inner.vm_name, state_file
        );
        Ok(())
    }

    /// Persist bindings of removable drives.
    pub async fn save_state(&self) -> Result<()> {
        let Some(state_file) = &self.inner.state_file else {
            return Ok(());
        };

        let _lock = self.inner.persist_lock.lock().await;
        let snapshot = self.snapshot();
        let persisted = PersistedBindings {
            vm_name: self.inner.vm_name.clone(),
            bindings: snapshot
                .drives
                .iter()
                .filter(|d| d.is_external)
                .map(|d| (d.id.clone(), d.bound_media.clone()))
                .collect(),
        };

        if let Some(parent) = state_file.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&persisted)?;
        fs::write(state_file, content).await?;
        Ok(())
    }

    fn claim(&self, drive_id: &str, requested: Option<&MediaLocation>) -> Result<DriveToken> {
        let snapshot = self.snapshot();
        let drive = snapshot
            .get(drive_id)
            .cloned()
            .ok_or_else(|| VmediaError::UnknownDrive {
                vm_name: self.inner.vm_name.clone(),
                drive_id: drive_id.to_string(),
            })?;

        let token = match self.inner.tokens.get(drive_id) {
            Some(token) if drive.is_external => token.clone(),
            _ => {
                return Err(self.rejected(
                    drive_id,
                    requested,
                    MediaError::NotExternal {
                        drive_id: drive_id.to_string(),
                    },
                ));
            }
        };

        let guard = token.try_lock_owned().map_err(|_| {
            self.rejected(
                drive_id,
                requested,
                MediaError::Busy {
                    drive_id: drive_id.to_string(),
                },
            )
        })?;

        // Re-read under the token so the drive reflects the last commit.
        let drive = self.snapshot().get(drive_id).cloned().unwrap_or(drive);
        Ok(DriveToken {
            drive,
            _guard: guard,
        })
    }

    /// Rejections happen before the drive is touched: published, not journaled.
    fn rejected(
        &self,
        drive_id: &str,
        requested: Option<&MediaLocation>,
        error: MediaError,
    ) -> VmediaError {
        warn!("Media change on {} rejected: {}", drive_id, error);
        self.inner.events.publish(MediaEvent::failed(
            &self.inner.vm_name,
            drive_id,
            requested.cloned(),
            self.version(),
            Notice::from(&error),
        ));
        error.into()
    }

    async fn run_swap(&self, token: DriveToken, location: MediaLocation) -> Result<DriveSnapshot> {
        let drive_id = token.drive.id.clone();
        info!(
            "Changing medium of {} on VM {} to {}",
            drive_id, self.inner.vm_name, location
        );

        let outcome = async {
            let media = self.probe_media(&drive_id, &location).await?;
            if self.power_state().is_live() {
                self.device_call(
                    &drive_id,
                    self.inner.device.change_medium(&token.drive, &media),
                )
                .await?;
            } else {
                debug!(
                    "VM {} is not running; {} will be attached at next boot",
                    self.inner.vm_name, location
                );
            }
            Ok::<_, MediaError>(())
        }
        .await;

        match outcome {
            Ok(()) => {
                let snapshot = self.commit(&drive_id, Some(location.clone()));
                self.finish(MediaEvent::changed(
                    &self.inner.vm_name,
                    &drive_id,
                    location,
                    snapshot.version,
                ))
                .await;
                Ok(snapshot)
            }
            Err(error) => Err(self.failed(&drive_id, Some(location), error).await),
        }
    }

    async fn run_eject(&self, token: DriveToken) -> Result<DriveSnapshot> {
        let drive_id = token.drive.id.clone();

        if token.drive.bound_media.is_none() {
            debug!("Drive {} is already empty", drive_id);
            return Ok(self.snapshot());
        }

        info!("Ejecting {} on VM {}", drive_id, self.inner.vm_name);

        if self.power_state().is_live() {
            if let Err(error) = self
                .device_call(&drive_id, self.inner.device.eject(&token.drive))
                .await
            {
                return Err(self.failed(&drive_id, None, error).await);
            }
        }

        let snapshot = self.commit(&drive_id, None);
        self.finish(MediaEvent::ejected(
            &self.inner.vm_name,
            &drive_id,
            snapshot.version,
        ))
        .await;
        Ok(snapshot)
    }

    async fn probe_media(
        &self,
        drive_id: &str,
        location: &MediaLocation,
    ) -> std::result::Result<MediaInfo, MediaError> {
        let timeout = self.inner.settings.probe_timeout;
        match tokio::time::timeout(timeout, self.inner.probe.probe(location)).await {
            Ok(Ok(media)) => Ok(media),
            Ok(Err(VmediaError::Media(e))) => Err(e),
            Ok(Err(e)) => Err(MediaError::UnreadableResource {
                location: location.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(MediaError::Timeout {
                drive_id: drive_id.to_string(),
                timeout,
            }),
        }
    }

    async fn device_call<F>(&self, drive_id: &str, call: F) -> std::result::Result<(), MediaError>
    where
        F: Future<Output = Result<()>>,
    {
        let timeout = self.inner.settings.device_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(VmediaError::Media(e))) => Err(e),
            Ok(Err(e)) => Err(MediaError::DeviceRejected {
                drive_id: drive_id.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(MediaError::Timeout {
                drive_id: drive_id.to_string(),
                timeout,
            }),
        }
    }

    fn commit(&self, drive_id: &str, binding: Option<MediaLocation>) -> DriveSnapshot {
        let mut published = None;
        self.inner.table.send_modify(|table| {
            let mut next = (**table).clone();
            if let Some(drive) = next.drives.iter_mut().find(|d| d.id == drive_id) {
                drive.bound_media = binding;
            }
            next.version += 1;
            let next = Arc::new(next);
            published = Some(next.clone());
            *table = next;
        });
        published.unwrap_or_else(|| self.snapshot())
    }

    async fn finish(&self, event: MediaEvent) {
        if let Err(e) = self.save_state().await {
            warn!("Failed to persist media bindings for {}: {}", self.inner.vm_name, e);
        }
        self.journal(&event).await;
        self.inner.events.publish(event);
    }

    async fn failed(
        &self,
        drive_id: &str,
        requested: Option<MediaLocation>,
        error: MediaError,
    ) -> VmediaError {
        warn!("Media change on {} failed: {}", drive_id, error);
        let event = MediaEvent::failed(
            &self.inner.vm_name,
            drive_id,
            requested,
            self.version(),
            Notice::from(&error),
        );
        self.journal(&event).await;
        self.inner.events.publish(event);
        error.into()
    }

    async fn journal(&self, event: &MediaEvent) {
        if let Some(journal) = &self.inner.journal {
            if let Err(e) = journal.record(event).await {
                warn!("Failed to write media journal {:?}: {}", journal.path(), e);
            }
        }
    }
}

#[async_trait]
impl MediaManager for DriveMediaManager {
    /// Runs on its own task. Dropping the returned future does not cancel an
    /// accepted change.
    async fn swap_media(&self, drive_id: &str, location: MediaLocation) -> Result<DriveSnapshot> {
        self.spawn_swap(drive_id, location).wait().await
    }

    async fn eject(&self, drive_id: &str) -> Result<DriveSnapshot> {
        self.spawn_eject(drive_id).wait().await
    }

    fn current_label(&self, drive_id: &str) -> Result<DisplayDescriptor> {
        self.snapshot()
            .get(drive_id)
            .map(Drive::descriptor)
            .ok_or_else(|| VmediaError::UnknownDrive {
                vm_name: self.inner.vm_name.clone(),
                drive_id: drive_id.to_string(),
            })
    }

    fn menu(&self) -> Vec<DisplayDescriptor> {
        self.snapshot()
            .drives
            .iter()
            .filter(|d| d.is_listed())
            .map(Drive::descriptor)
            .collect()
    }
}

/// Handle to a media change running in the background.
pub struct MediaTask {
    inner: TaskState,
}

enum TaskState {
    Ready(Result<DriveSnapshot>),
    Running(JoinHandle<Result<DriveSnapshot>>),
}

impl MediaTask {
    fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<DriveSnapshot>> + Send + 'static,
    {
        Self {
            inner: TaskState::Running(tokio::spawn(future)),
        }
    }

    fn ready(result: Result<DriveSnapshot>) -> Self {
        Self {
            inner: TaskState::Ready(result),
        }
    }

    pub fn is_finished(&self) -> bool {
        match &self.inner {
            TaskState::Ready(_) => true,
            TaskState::Running(handle) => handle.is_finished(),
        }
    }

    pub async fn wait(self) -> Result<DriveSnapshot> {
        match self.inner {
            TaskState::Ready(result) => result,
            TaskState::Running(handle) => handle
                .await
                .map_err(|e| VmediaError::Other(anyhow::anyhow!("media task aborted: {e}")))?,
        }
    }
}

/// The emulated device side of a drive.
#[async_trait]
pub trait MediaDevice: Send + Sync {
    async fn change_medium(&self, drive: &Drive, media: &MediaInfo) -> Result<()>;
    /// Remove the medium, overriding a tray the guest has locked.
    async fn eject(&self, drive: &Drive) -> Result<()>;
    fn name(&self) -> &str;
}

/// Validates backing-media locations before they are bound.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, location: &MediaLocation) -> Result<MediaInfo>;
}
