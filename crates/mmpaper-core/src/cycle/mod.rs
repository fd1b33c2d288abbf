//! One boot-to-suspend pass: gate, trigger, connect, check, install, render,
//! then either reboot into new firmware or sleep until the next window.

use embedded_hal_async::delay::DelayNs;
use log::{info, warn};

use crate::{
    config::{FirmwareInstall, UpdateConfig},
    install::{ArtifactSink, FlashInstall, FlashUpdater, StagedInstall, StagingFs},
    manifest::{ArtifactKind, Token},
    network::{self, LinkDriver, NetworkCandidate},
    refresh::{RefreshPanel, RefreshState},
    render::RenderError,
    sleep,
    status::{StatusMessage, StatusStyle},
    store::{KeyValueStore, ScheduleRecord},
    time::WallClock,
    transfer::HttpClient,
    trigger::{BootKind, BootState},
    update::{self, CheckReport, Outcome, UpdateError},
};

/// Board services the cycle needs besides network, storage and flash.
pub trait Appliance: WallClock + RefreshPanel {
    fn battery_percent(&mut self) -> u8;
    /// Milliseconds since this boot.
    fn uptime_ms(&mut self) -> u64;
    /// Draws `message` into the frame; the caller refreshes.
    fn draw_status(&mut self, message: &StatusMessage);
    /// Decodes the image at `path` into the frame; the caller refreshes.
    fn draw_content<F: StagingFs>(&mut self, fs: &mut F, path: &str) -> Result<(), RenderError>;
}

/// Everything that lives for one boot. Only `schedule` is backed by the store.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceState {
    pub boot: BootState,
    pub schedule: ScheduleRecord,
    pub refresh: RefreshState,
}

impl DeviceState {
    /// Fresh process state over whatever the store retained. A store that
    /// cannot be read behaves like an empty one.
    pub fn load<S: KeyValueStore>(kind: BootKind, store: &mut S) -> Self {
        let schedule = ScheduleRecord::load(store).unwrap_or_else(|_| {
            warn!("cycle: schedule store unreadable; starting from defaults");
            ScheduleRecord::default()
        });
        Self {
            boot: BootState::new(kind),
            schedule,
            refresh: RefreshState::default(),
        }
    }
}

/// Terminal transition of a cycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CycleEnd {
    /// A firmware image was finalized; restart into it.
    Reboot,
    /// Suspend with a timer wake-up.
    Sleep { seconds: u32 },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CycleReport {
    pub end: CycleEnd,
    /// `None` when the check was not due or was gated.
    pub firmware: Option<Outcome>,
    pub content: Option<Outcome>,
}

/// Collaborators owned by the cycle.
pub struct Devices<N, D, S, F, U, A> {
    /// Radio link plus HTTP transport.
    pub net: N,
    pub delay: D,
    pub store: S,
    /// Removable staging medium; `None` when no card is present.
    pub staging: Option<F>,
    /// OTA slot writer; `None` on builds without one.
    pub flash: Option<U>,
    pub appliance: A,
}

pub struct Orchestrator<'a, N, D, S, F, U, A> {
    config: UpdateConfig,
    candidates: &'a [NetworkCandidate],
    devices: Devices<N, D, S, F, U, A>,
    state: DeviceState,
}

impl<'a, N, D, S, F, U, A> Orchestrator<'a, N, D, S, F, U, A>
where
    N: LinkDriver + HttpClient,
    D: DelayNs,
    S: KeyValueStore,
    F: StagingFs,
    U: FlashUpdater,
    A: Appliance,
{
    pub fn new(
        config: UpdateConfig,
        candidates: &'a [NetworkCandidate],
        devices: Devices<N, D, S, F, U, A>,
        state: DeviceState,
    ) -> Self {
        Self {
            config,
            candidates,
            devices,
            state,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn devices(&self) -> &Devices<N, D, S, F, U, A> {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut Devices<N, D, S, F, U, A> {
        &mut self.devices
    }

    pub fn into_parts(self) -> (Devices<N, D, S, F, U, A>, DeviceState) {
        (self.devices, self.state)
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        let now = self.devices.appliance.now();
        info!(
            "cycle: start boot={} time_known={}",
            self.state.boot.kind.as_str(),
            now.is_some()
        );

        self.recover_staged();

        let battery = self.devices.appliance.battery_percent();
        if battery < self.config.min_battery_percent {
            warn!(
                "cycle: {} ({}% < {}%), skipping checks",
                UpdateError::BatteryTooLow.as_str(),
                battery,
                self.config.min_battery_percent
            );
            if self.state.boot.is_cold() {
                self.render_existing().await;
            }
            return self.finish(None, None, false);
        }

        let firmware_due = self.state.boot.due_for_firmware_check(
            &mut self.state.schedule,
            &mut self.devices.store,
            now.as_ref(),
        );
        let content_due = self.state.boot.due_for_content_check(
            &mut self.state.schedule,
            &mut self.devices.store,
            &self.config.schedule,
            now.as_ref(),
        );

        let mut firmware = None;
        let mut content = None;
        let firmware_runnable = firmware_due && self.firmware_destination_ready();
        if firmware_due && !firmware_runnable {
            warn!("cycle: firmware destination unavailable, skipping update");
            firmware = Some(Outcome::Failed(UpdateError::StorageUnavailable));
        }
        let content_runnable = content_due && self.devices.staging.is_some();
        if content_due && !content_runnable {
            warn!("cycle: staging card not found, skipping content check");
            content = Some(Outcome::Failed(UpdateError::StorageUnavailable));
        }

        let mut screen_replaced = false;
        let mut connected = false;
        if firmware_runnable || content_runnable {
            if firmware_runnable {
                self.show_status(&StatusMessage::checking()).await;
                screen_replaced = true;
            }

            match network::connect(
                &mut self.devices.net,
                &mut self.devices.delay,
                self.candidates,
                &self.config.acquire,
            )
            .await
            {
                Ok(index) => {
                    info!("cycle: online via {}", self.candidates[index].identifier);
                    connected = true;
                }
                Err(err) => {
                    if firmware_runnable {
                        self.show_status(&StatusMessage::no_network()).await;
                    }
                    firmware = firmware_runnable.then_some(Outcome::Failed(err)).or(firmware);
                    content = content_runnable.then_some(Outcome::Failed(err)).or(content);
                }
            }
        }

        if connected && firmware_runnable {
            let report = self.check_firmware().await;
            self.adopt_server_time(report.server_time);
            match report.outcome {
                Outcome::Updated(version) => {
                    info!("cycle: firmware {} installed, rebooting", version);
                    self.show_status(&StatusMessage::update_successful()).await;
                    self.devices.net.power_off().await;
                    return CycleReport {
                        end: CycleEnd::Reboot,
                        firmware: Some(Outcome::Updated(version)),
                        content: None,
                    };
                }
                Outcome::Failed(
                    err @ (UpdateError::TransferIncomplete | UpdateError::InstallFailed),
                ) => {
                    self.show_status(&StatusMessage::download_failed()).await;
                    firmware = Some(Outcome::Failed(err));
                }
                other => firmware = Some(other),
            }
        }

        let mut rendered = false;
        if connected && content_runnable {
            let report = self.check_content().await;
            self.adopt_server_time(report.server_time);
            if let Outcome::Updated(fingerprint) = &report.outcome {
                rendered = self.render_update(fingerprint);
            }
            content = Some(report.outcome);
        }

        if connected {
            self.devices.net.power_off().await;
        }
        if !rendered && (self.state.boot.is_cold() || screen_replaced) {
            self.render_existing().await;
        }

        self.finish(firmware, content, true)
    }

    /// Finishes swaps a previous boot left half done so the last verified
    /// artifact is the one in place.
    fn recover_staged(&mut self) {
        let Some(fs) = self.devices.staging.as_mut() else {
            return;
        };
        let staged = [self.config.content_staging].into_iter().chain(
            (self.config.firmware_install == FirmwareInstall::Staged)
                .then_some(self.config.firmware_staging),
        );
        for paths in staged {
            if let Err(err) = StagedInstall::new(fs, paths).recover() {
                warn!("cycle: recovering {} failed: {}", paths.target, err.as_str());
            }
        }
    }

    fn firmware_destination_ready(&self) -> bool {
        match self.config.firmware_install {
            FirmwareInstall::Flash => self.devices.flash.is_some(),
            FirmwareInstall::Staged => self.devices.staging.is_some(),
        }
    }

    async fn check_firmware(&mut self) -> CheckReport {
        let Self {
            config,
            devices,
            state,
            ..
        } = self;
        let Devices {
            net,
            delay,
            staging,
            flash,
            appliance,
            ..
        } = devices;
        let refresh = &mut state.refresh;
        let on_found = |_: &Token| {
            present(&mut *appliance, &mut *refresh, &StatusMessage::update_found());
        };

        match (config.firmware_install, flash.as_mut(), staging.as_mut()) {
            (FirmwareInstall::Flash, Some(flash), _) => {
                let mut sink = FlashInstall::new(flash);
                fetch_into(
                    net,
                    delay,
                    config,
                    ArtifactKind::Firmware,
                    config.firmware_version,
                    &mut sink,
                    on_found,
                )
                .await
            }
            (FirmwareInstall::Staged, _, Some(fs)) => {
                let mut sink = StagedInstall::new(fs, config.firmware_staging);
                fetch_into(
                    net,
                    delay,
                    config,
                    ArtifactKind::Firmware,
                    config.firmware_version,
                    &mut sink,
                    on_found,
                )
                .await
            }
            _ => CheckReport {
                outcome: Outcome::Failed(UpdateError::StorageUnavailable),
                server_time: None,
            },
        }
    }

    async fn check_content(&mut self) -> CheckReport {
        let Self {
            config,
            devices,
            state,
            ..
        } = self;
        let Some(fs) = devices.staging.as_mut() else {
            return CheckReport {
                outcome: Outcome::Failed(UpdateError::StorageUnavailable),
                server_time: None,
            };
        };
        let mut sink = StagedInstall::new(fs, config.content_staging);
        fetch_into(
            &mut devices.net,
            &mut devices.delay,
            config,
            ArtifactKind::Content,
            state.schedule.local_content_fingerprint.as_str(),
            &mut sink,
            |_| {},
        )
        .await
    }

    /// Draws the freshly installed image and adopts its fingerprint once it is
    /// on screen.
    fn render_update(&mut self, fingerprint: &Token) -> bool {
        if !self.draw_and_refresh_content() {
            warn!("cycle: new content not shown; fingerprint kept");
            return false;
        }
        if self
            .state
            .schedule
            .commit_fingerprint(&mut self.devices.store, fingerprint)
            .is_err()
        {
            warn!("cycle: failed to persist content fingerprint");
        }
        true
    }

    /// Puts whatever is already staged back on screen, or the splash when
    /// nothing is.
    async fn render_existing(&mut self) {
        if !self.draw_and_refresh_content() {
            let splash = StatusMessage::splash(self.config.firmware_version);
            self.show_status(&splash).await;
        }
    }

    fn draw_and_refresh_content(&mut self) -> bool {
        let Devices {
            staging, appliance, ..
        } = &mut self.devices;
        let Some(fs) = staging.as_mut() else {
            return false;
        };
        let path = self.config.content_staging.target;
        if let Err(err) = appliance.draw_content(fs, path) {
            warn!("cycle: render {} failed: {}", path, err.as_str());
            return false;
        }

        let now_ms = appliance.uptime_ms();
        let refresh = &mut self.state.refresh;
        let result = if self.state.boot.is_cold() {
            refresh.force_full(appliance, now_ms)
        } else {
            refresh.mark_dirty();
            refresh
                .smart_refresh(appliance, &self.config.refresh, now_ms)
                .map(|_| ())
        };
        result.is_ok()
    }

    async fn show_status(&mut self, message: &StatusMessage) {
        present(
            &mut self.devices.appliance,
            &mut self.state.refresh,
            message,
        );
        if message.hold_ms > 0 {
            self.devices.delay.delay_ms(message.hold_ms).await;
        }
    }

    /// Server `Date` headers are the only time source on the first boot.
    fn adopt_server_time(&mut self, server_time: Option<u32>) {
        if let Some(unix) = server_time {
            self.devices.appliance.sync(unix);
        }
    }

    fn finish(
        &mut self,
        firmware: Option<Outcome>,
        content: Option<Outcome>,
        log_outcomes: bool,
    ) -> CycleReport {
        if log_outcomes {
            info!(
                "cycle: firmware={} content={}",
                firmware.as_ref().map_or("skipped", Outcome::as_str),
                content.as_ref().map_or("skipped", Outcome::as_str)
            );
        }
        let now = self.devices.appliance.now();
        let seconds = sleep::seconds_until_next_check(
            now.as_ref(),
            self.config.schedule.check_hours,
            &self.config.sleep,
        );
        CycleReport {
            end: CycleEnd::Sleep { seconds },
            firmware,
            content,
        }
    }
}

fn present<A: Appliance>(appliance: &mut A, refresh: &mut RefreshState, message: &StatusMessage) {
    let first = message.lines().next().unwrap_or("");
    match message.style {
        StatusStyle::Splash => info!("status: splash"),
        StatusStyle::Notice => info!("status: {}", first),
    }
    appliance.draw_status(message);
    let now_ms = appliance.uptime_ms();
    if refresh.force_full(appliance, now_ms).is_err() {
        warn!("status: panel refresh failed");
    }
}

#[allow(clippy::too_many_arguments)]
async fn fetch_into<H, D, K, F>(
    http: &mut H,
    delay: &mut D,
    config: &UpdateConfig,
    kind: ArtifactKind,
    local: &str,
    sink: &mut K,
    on_found: F,
) -> CheckReport
where
    H: HttpClient,
    D: DelayNs,
    K: ArtifactSink,
    F: FnMut(&Token),
{
    update::check_and_fetch(
        http,
        delay,
        kind,
        &config.paths,
        local,
        sink,
        &config.transfer,
        on_found,
    )
    .await
}

#[cfg(test)]
mod tests;
