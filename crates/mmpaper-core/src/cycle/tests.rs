use super::*;
use crate::{
    install::Completion,
    network::AcquireConfig,
    refresh::RefreshKind,
    store::{KEY_IMAGE_MD5, MemoryStore},
    testing::{MockAppliance, MockDelay, MockFlash, MockFs, MockHttp, MockLink, MockNet, Route},
    time::WallTime,
    trigger::ScheduleConfig,
};
use embassy_futures::block_on;

type TestOrchestrator<'a> =
    Orchestrator<'a, MockNet, MockDelay, MemoryStore<8>, MockFs, MockFlash, MockAppliance>;

const HOME: NetworkCandidate = NetworkCandidate {
    identifier: "home",
    secret: "secret",
    priority: 0,
};
const CANDIDATES: [NetworkCandidate; 1] = [HOME];

const JPEG: &[u8] = b"\xFF\xD8\xFF\xE0new-image\xFF\xD9";
const OLD_JPEG: &[u8] = b"\xFF\xD8old-image\xFF\xD9";
const FIRMWARE: &[u8] = b"\xE9firmware-image";

fn at(hour: u8, minute: u8) -> u32 {
    WallTime::from_civil(2025, 3, 14, hour, minute, 0).unix
}

fn config() -> UpdateConfig {
    UpdateConfig {
        acquire: AcquireConfig {
            max_loops: 2,
            per_candidate_timeout_ms: 500,
            inter_loop_delay_ms: 100,
            link_poll_ms: 100,
        },
        ..UpdateConfig::default()
    }
}

fn firmware_descriptor(version: &str) -> std::vec::Vec<u8> {
    std::format!(r#"{{"version": "{version}"}}"#).into_bytes()
}

fn content_descriptor(md5: &str) -> std::vec::Vec<u8> {
    std::format!(r#"{{"md5":"{md5}","updated":"today"}}"#).into_bytes()
}

struct Scenario {
    kind: BootKind,
    http: MockHttp,
    link: MockLink,
    store: MemoryStore<8>,
    staging: Option<MockFs>,
    flash: Option<MockFlash>,
    appliance: MockAppliance,
}

impl Scenario {
    fn new(kind: BootKind, clock: Option<u32>) -> Self {
        Self {
            kind,
            http: MockHttp::new(),
            link: MockLink::linking("home", 1),
            store: MemoryStore::new(),
            staging: Some(MockFs::default()),
            flash: Some(MockFlash::with_capacity(4_096)),
            appliance: MockAppliance::at(clock, 80),
        }
    }

    fn route(mut self, route: Route) -> Self {
        self.http = self.http.with(route);
        self
    }

    fn build(mut self, config: UpdateConfig) -> TestOrchestrator<'static> {
        let state = DeviceState::load(self.kind, &mut self.store);
        Orchestrator::new(
            config,
            &CANDIDATES,
            Devices {
                net: MockNet {
                    link: self.link,
                    http: self.http,
                },
                delay: MockDelay::default(),
                store: self.store,
                staging: self.staging,
                flash: self.flash,
                appliance: self.appliance,
            },
            state,
        )
    }
}

fn token(value: &str) -> Token {
    let mut out = Token::new();
    out.push_str(value).unwrap();
    out
}

#[test]
fn low_battery_skips_everything_before_touching_network_or_store() {
    let mut scenario = Scenario::new(BootKind::ColdBoot, Some(at(9, 1)));
    scenario.appliance.battery = 29;
    scenario.staging = Some(MockFs::default().with_file("IMAGE.JPG", OLD_JPEG));
    let mut orchestrator = scenario.build(config());

    let report = block_on(orchestrator.run_cycle());

    assert_eq!(report.firmware, None);
    assert_eq!(report.content, None);
    let devices = orchestrator.devices();
    assert!(devices.net.link.attempts().is_empty());
    assert!(devices.net.http.requests().is_empty());
    assert_eq!(devices.store.writes(), 0);
    // Cold boot still puts the cached image back on screen.
    assert_eq!(devices.appliance.drawn, [OLD_JPEG]);
    assert!(matches!(report.end, CycleEnd::Sleep { .. }));
}

#[test]
fn interrupted_swap_is_finished_before_the_cached_image_is_shown() {
    let mut scenario = Scenario::new(BootKind::ColdBoot, Some(at(9, 1)));
    scenario.appliance.battery = 29;
    scenario.staging = Some(
        MockFs::default()
            .with_file("IMAGE.TMP", JPEG)
            .with_file("IMAGE.RDY", &(JPEG.len() as u32).to_le_bytes()),
    );
    let mut orchestrator = scenario.build(config());

    block_on(orchestrator.run_cycle());

    let devices = orchestrator.devices();
    let fs = devices.staging.as_ref().unwrap();
    assert_eq!(fs.file("IMAGE.JPG"), Some(JPEG));
    assert_eq!(fs.file("IMAGE.TMP"), None);
    assert_eq!(fs.file("IMAGE.RDY"), None);
    assert_eq!(devices.appliance.drawn, [JPEG]);
}

#[test]
fn cold_boot_installs_new_content_and_commits_fingerprint_after_render() {
    let mut orchestrator = Scenario::new(BootKind::ColdBoot, Some(at(10, 30)))
        .route(Route::ok("/firmware.json", &firmware_descriptor("0.1.0")))
        .route(Route::ok("/image/image_meta.json", &content_descriptor("abc123")))
        .route(Route::ok("/image/current.jpg", JPEG).chunked(5))
        .build(config());

    let report = block_on(orchestrator.run_cycle());

    assert_eq!(report.firmware, Some(Outcome::UpToDate));
    assert_eq!(report.content, Some(Outcome::Updated(token("abc123"))));
    // 10:30 -> 12:00 plus the wake offset
    assert_eq!(report.end, CycleEnd::Sleep { seconds: 5_400 + 30 });

    let (mut devices, state) = orchestrator.into_parts();
    assert_eq!(state.schedule.local_content_fingerprint, "abc123");
    assert_eq!(
        devices.store.get_str(KEY_IMAGE_MD5).unwrap().as_deref(),
        Some("abc123")
    );
    let fs = devices.staging.as_ref().unwrap();
    assert_eq!(fs.file("IMAGE.JPG"), Some(JPEG));
    assert_eq!(fs.file("IMAGE.TMP"), None);
    assert_eq!(devices.appliance.drawn, [JPEG]);
    assert_eq!(devices.appliance.status_lines(), ["Checking for updates..."]);
    assert_eq!(
        devices.appliance.refreshes.last(),
        Some(&RefreshKind::Full)
    );
    assert!(devices.net.link.powered_off);
    assert!(devices.flash.as_ref().unwrap().image.is_empty());
}

#[test]
fn finalized_firmware_install_ends_in_reboot() {
    let mut orchestrator = Scenario::new(BootKind::ColdBoot, Some(at(10, 30)))
        .route(Route::ok("/firmware.json", &firmware_descriptor("0.2.0")))
        .route(Route::ok("/MMpaper.bin", FIRMWARE).chunked(4))
        .route(Route::ok("/image/image_meta.json", &content_descriptor("abc123")))
        .build(config());

    let report = block_on(orchestrator.run_cycle());

    assert_eq!(report.end, CycleEnd::Reboot);
    assert_eq!(report.firmware, Some(Outcome::Updated(token("0.2.0"))));
    assert_eq!(report.content, None);

    let devices = orchestrator.devices();
    let flash = devices.flash.as_ref().unwrap();
    assert!(flash.finalized);
    assert_eq!(flash.image, FIRMWARE);
    assert_eq!(
        devices.appliance.status_lines(),
        ["Checking for updates...", "Update found!", "Update successful!"]
    );
    assert!(devices.net.link.powered_off);
    // content check waits for the next boot
    assert!(!devices.net.http.requests().contains(&"/image/image_meta.json"));
}

#[test]
fn unconfirmed_firmware_install_does_not_reboot() {
    let mut scenario = Scenario::new(BootKind::ColdBoot, Some(at(10, 30)))
        .route(Route::ok("/firmware.json", &firmware_descriptor("0.2.0")))
        .route(Route::ok("/MMpaper.bin", FIRMWARE))
        .route(Route::ok("/image/image_meta.json", &content_descriptor("abc123")))
        .route(Route::ok("/image/current.jpg", JPEG));
    if let Some(flash) = scenario.flash.as_mut() {
        flash.completion = Completion::Uncertain;
    }
    let mut orchestrator = scenario.build(config());

    let report = block_on(orchestrator.run_cycle());

    assert!(matches!(report.end, CycleEnd::Sleep { .. }));
    assert_eq!(
        report.firmware,
        Some(Outcome::Failed(UpdateError::InstallFailed))
    );
    assert_eq!(report.content, Some(Outcome::Updated(token("abc123"))));
    let devices = orchestrator.devices();
    let flash = devices.flash.as_ref().unwrap();
    assert_eq!(flash.aborts, 1);
    // Next boot stays on the running image.
    assert!(!flash.slot_activated);
    assert!(
        devices
            .appliance
            .status_lines()
            .contains(&"Download failed!")
    );
    // status hold of two seconds
    assert!(devices.delay.elapsed_ms() >= 2_000);
}

#[test]
fn staged_firmware_lands_on_the_card() {
    let config = UpdateConfig {
        firmware_install: FirmwareInstall::Staged,
        ..config()
    };
    let mut scenario = Scenario::new(BootKind::ColdBoot, Some(at(10, 30)))
        .route(Route::ok("/firmware.json", &firmware_descriptor("0.2.0")))
        .route(Route::ok("/MMpaper.bin", FIRMWARE));
    scenario.flash = None;
    let mut orchestrator = scenario.build(config);

    let report = block_on(orchestrator.run_cycle());

    assert_eq!(report.end, CycleEnd::Reboot);
    let fs = orchestrator.devices().staging.as_ref().unwrap();
    assert_eq!(fs.file("MMPAPER.BIN"), Some(FIRMWARE));
    assert_eq!(fs.file("MMPAPER.TMP"), None);
}

#[test]
fn no_network_falls_back_to_cached_content() {
    let mut scenario = Scenario::new(BootKind::ColdBoot, Some(at(10, 30)))
        .route(Route::ok("/firmware.json", &firmware_descriptor("0.2.0")));
    scenario.link = MockLink::never();
    scenario.staging = Some(MockFs::default().with_file("IMAGE.JPG", OLD_JPEG));
    let mut orchestrator = scenario.build(config());

    let report = block_on(orchestrator.run_cycle());

    assert_eq!(
        report.firmware,
        Some(Outcome::Failed(UpdateError::NetworkUnavailable))
    );
    assert_eq!(
        report.content,
        Some(Outcome::Failed(UpdateError::NetworkUnavailable))
    );
    let devices = orchestrator.devices();
    assert_eq!(devices.net.link.attempts().len(), 2);
    assert!(devices.net.link.powered_off);
    assert!(devices.net.http.requests().is_empty());
    assert_eq!(
        devices.appliance.status_lines(),
        ["Checking for updates...", "No WiFi - Starting app"]
    );
    assert_eq!(devices.appliance.drawn, [OLD_JPEG]);
}

#[test]
fn unchanged_content_in_window_only_records_the_window() {
    let mut scenario = Scenario::new(BootKind::WakeFromDeepSleep, Some(at(9, 1)))
        .route(Route::ok("/image/image_meta.json", &content_descriptor("abc123")))
        .route(Route::ok("/image/current.jpg", JPEG));
    scenario.store.put_str(KEY_IMAGE_MD5, "abc123").unwrap();
    scenario.staging = Some(MockFs::default().with_file("IMAGE.JPG", OLD_JPEG));
    let writes_before = scenario.store.writes();
    let mut orchestrator = scenario.build(config());

    let report = block_on(orchestrator.run_cycle());

    assert_eq!(report.firmware, None);
    assert_eq!(report.content, Some(Outcome::UpToDate));
    let devices = orchestrator.devices();
    assert_eq!(devices.net.http.requests(), ["/image/image_meta.json"]);
    // hour and day of the window, nothing else
    assert_eq!(devices.store.writes(), writes_before + 2);
    // e-ink keeps the image across deep sleep; nothing to redraw
    assert!(devices.appliance.drawn.is_empty());
    assert!(devices.appliance.refreshes.is_empty());
    assert_eq!(
        report.end,
        CycleEnd::Sleep {
            seconds: 3 * 3_600 - 60 + 30
        }
    );
}

#[test]
fn wake_outside_window_stays_offline() {
    let mut orchestrator =
        Scenario::new(BootKind::WakeFromDeepSleep, Some(at(10, 30))).build(config());

    let report = block_on(orchestrator.run_cycle());

    assert_eq!(report.firmware, None);
    assert_eq!(report.content, None);
    let devices = orchestrator.devices();
    assert!(devices.net.link.attempts().is_empty());
    assert_eq!(devices.store.writes(), 0);
}

#[test]
fn new_content_that_fails_to_render_keeps_old_fingerprint() {
    let mut scenario = Scenario::new(BootKind::WakeFromDeepSleep, Some(at(12, 0)))
        .route(Route::ok("/image/image_meta.json", &content_descriptor("def456")))
        .route(Route::ok("/image/current.jpg", b"not a jpeg"));
    scenario.store.put_str(KEY_IMAGE_MD5, "abc123").unwrap();
    let mut orchestrator = scenario.build(config());

    let report = block_on(orchestrator.run_cycle());

    assert_eq!(report.content, Some(Outcome::Updated(token("def456"))));
    let (mut devices, state) = orchestrator.into_parts();
    assert_eq!(state.schedule.local_content_fingerprint, "abc123");
    assert_eq!(
        devices.store.get_str(KEY_IMAGE_MD5).unwrap().as_deref(),
        Some("abc123")
    );
}

#[test]
fn panel_failure_keeps_old_fingerprint() {
    let mut scenario = Scenario::new(BootKind::WakeFromDeepSleep, Some(at(12, 0)))
        .route(Route::ok("/image/image_meta.json", &content_descriptor("def456")))
        .route(Route::ok("/image/current.jpg", JPEG));
    scenario.appliance.panel_fails = true;
    let mut orchestrator = scenario.build(config());

    block_on(orchestrator.run_cycle());

    let state = orchestrator.state();
    assert!(state.schedule.local_content_fingerprint.is_empty());
    assert!(state.refresh.dirty);
}

#[test]
fn missing_card_skips_content_but_not_flash_firmware() {
    let mut scenario = Scenario::new(BootKind::ColdBoot, Some(at(10, 30)))
        .route(Route::ok("/firmware.json", &firmware_descriptor("0.1.0")));
    scenario.staging = None;
    let mut orchestrator = scenario.build(config());

    let report = block_on(orchestrator.run_cycle());

    assert_eq!(report.firmware, Some(Outcome::UpToDate));
    assert_eq!(
        report.content,
        Some(Outcome::Failed(UpdateError::StorageUnavailable))
    );
    let devices = orchestrator.devices();
    assert_eq!(devices.net.http.requests(), ["/firmware.json"]);
    // nothing cached to show
    assert_eq!(
        devices.appliance.status_lines().last(),
        Some(&"MMpaper")
    );
}

#[test]
fn first_boot_without_time_syncs_from_server_date() {
    let server_now = at(23, 50);
    let mut orchestrator = Scenario::new(BootKind::ColdBoot, None)
        .route(Route::ok("/firmware.json", &firmware_descriptor("0.1.0")).dated(server_now))
        .route(Route::ok("/image/image_meta.json", &content_descriptor("abc123")))
        .route(Route::ok("/image/current.jpg", JPEG))
        .build(config());

    let report = block_on(orchestrator.run_cycle());

    // 23:50 -> 00:00 instead of the one-hour fallback
    assert_eq!(report.end, CycleEnd::Sleep { seconds: 600 + 30 });
    assert_eq!(orchestrator.devices().appliance.syncs, [server_now]);
    // the first-boot decision could not record a window without time
    assert_eq!(orchestrator.state().schedule.content_window(), None);
}

#[test]
fn restart_rearms_firmware_but_not_a_recorded_window() {
    let mut orchestrator = Scenario::new(BootKind::WakeFromDeepSleep, Some(at(9, 1)))
        .route(Route::ok("/image/image_meta.json", &content_descriptor("abc123")))
        .route(Route::ok("/image/current.jpg", JPEG))
        .build(config());
    block_on(orchestrator.run_cycle());
    let (mut devices, _) = orchestrator.into_parts();

    // Deep-sleep wake a few minutes later, same window.
    let mut state = DeviceState::load(BootKind::WakeFromDeepSleep, &mut devices.store);
    assert_eq!(state.schedule.content_window(), Some((9, 14)));
    assert_eq!(state.schedule.local_content_fingerprint, "abc123");
    let later = WallTime::from_unix(at(9, 3), 0);
    assert!(!state.boot.due_for_content_check(
        &mut state.schedule,
        &mut devices.store,
        &ScheduleConfig::default(),
        Some(&later),
    ));
    assert!(!state.boot.firmware_check_armed);

    // Power cycle: firmware check is armed again.
    let state = DeviceState::load(BootKind::ColdBoot, &mut devices.store);
    assert!(state.boot.firmware_check_armed);
}

