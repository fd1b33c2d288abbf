#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use esp_hal::{
    clock::CpuClock,
    delay::Delay,
    gpio::{Level, Output, OutputConfig, RtcPin},
    rtc_cntl::Rtc,
    spi::master::Spi,
    time::{Instant, Rate},
    timer::timg::TimerGroup,
};
use esp_storage::FlashStorage;
use heapless::Vec;
use log::{LevelFilter, info, warn};
use mmpaper_core::{
    config::UpdateConfig,
    cycle::{CycleEnd, DeviceState, Devices, Orchestrator},
    network::NetworkCandidate,
};
use mmpaper_hal_esp32s3::{
    network::{HttpConnection, ServerConfig, WifiTransport},
    ota::OtaFlash,
    platform::{
        appliance::{BoardAppliance, FrameBuffers},
        battery::AdcBattery,
        clock::RtcClock,
        display::SharpDisplay,
    },
    storage::sd_stage::SdStaging,
};
use static_cell::StaticCell;

use store::ScheduleStore;

#[path = "main/power.rs"]
mod power;
#[path = "main/store.rs"]
mod store;

const DISPLAY_SPI_HZ: u32 = 1_000_000;
const SD_SPI_HZ: u32 = 400_000;
const SOCKET_RX_BYTES: usize = 4096;
const SOCKET_TX_BYTES: usize = 512;
/// Cell-to-pin ratio of the battery sense divider.
const BATTERY_DIVIDER: u32 = 2;
const UTC_OFFSET_SECS: i32 = 0;

const WIFI_SSID: &str = env!(
    "MMPAPER_WIFI_SSID",
    "Set MMPAPER_WIFI_SSID in your environment before building/flashing."
);
const WIFI_PASSWORD: &str = env!(
    "MMPAPER_WIFI_PASSWORD",
    "Set MMPAPER_WIFI_PASSWORD in your environment before building/flashing."
);
const BACKUP_WIFI_SSID: Option<&str> = option_env!("MMPAPER_BACKUP_WIFI_SSID");
const BACKUP_WIFI_PASSWORD: &str = match option_env!("MMPAPER_BACKUP_WIFI_PASSWORD") {
    Some(password) => password,
    None => "",
};
const UPDATE_SERVER: ServerConfig = ServerConfig {
    host: env!(
        "MMPAPER_UPDATE_HOST",
        "Set MMPAPER_UPDATE_HOST to the update server name before building/flashing."
    ),
    port: 80,
    user_agent: concat!("mmpaper/", env!("CARGO_PKG_VERSION")),
};

static NET_RESOURCES: StaticCell<embassy_net::StackResources<3>> = StaticCell::new();
static SOCKET_RX: StaticCell<[u8; SOCKET_RX_BYTES]> = StaticCell::new();
static SOCKET_TX: StaticCell<[u8; SOCKET_TX_BYTES]> = StaticCell::new();
static FRAMES: StaticCell<FrameBuffers> = StaticCell::new();

#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

fn candidates() -> Vec<NetworkCandidate, 2> {
    let mut list = Vec::new();
    let _ = list.push(NetworkCandidate {
        identifier: WIFI_SSID,
        secret: WIFI_PASSWORD,
        priority: 0,
    });
    if let Some(ssid) = BACKUP_WIFI_SSID.filter(|ssid| !ssid.is_empty()) {
        let _ = list.push(NetworkCandidate {
            identifier: ssid,
            secret: BACKUP_WIFI_PASSWORD,
            priority: 1,
        });
    }
    list
}

#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    esp_println::logger::init_logger(LevelFilter::Info);
    esp_println::println!("boot: mmpaper {} starting", env!("CARGO_PKG_VERSION"));

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);
    let boot_kind = power::boot_kind();

    let update_config = UpdateConfig {
        firmware_version: env!("CARGO_PKG_VERSION"),
        ..UpdateConfig::default()
    };
    let fault_sleep_secs = update_config.sleep.fallback_sleep_secs;

    // esp-radio requires an allocator.
    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 65536);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    // Display wiring: CLK=GPIO13, DI=GPIO14, CS=GPIO15, DISP=GPIO2, EMD=GPIO9
    let disp_pin = peripherals.GPIO2;
    // Release the deep-sleep pad hold before driving DISP again.
    disp_pin.rtcio_pad_hold(false);
    let disp = Output::new(disp_pin, Level::High, OutputConfig::default());
    let emd = Output::new(peripherals.GPIO9, Level::Low, OutputConfig::default());
    let cs = Output::new(peripherals.GPIO15, Level::Low, OutputConfig::default());

    let spi_config = esp_hal::spi::master::Config::default()
        .with_frequency(Rate::from_hz(DISPLAY_SPI_HZ))
        // LS027B7DH01 uses CPOL=0, CPHA=1.
        .with_mode(esp_hal::spi::Mode::_1);
    let spi = match Spi::new(peripherals.SPI2, spi_config) {
        Ok(spi) => spi
            .with_sck(peripherals.GPIO13)
            .with_mosi(peripherals.GPIO14),
        Err(err) => {
            warn!("display: spi config rejected: {:?}", err);
            power::sleep_after_fault("display spi", fault_sleep_secs)
        }
    };

    let mut delay = Delay::new();
    let mut display = SharpDisplay::new(spi, disp, emd, cs);
    if let Err(err) = display.initialize(&mut delay) {
        warn!("display: initialize failed: {:?}", err);
    }

    // SD wiring: CS=GPIO8, SCK=GPIO4, MOSI=GPIO40, MISO=GPIO41
    let sd_cs = Output::new(peripherals.GPIO8, Level::High, OutputConfig::default());
    let sd_spi_config = esp_hal::spi::master::Config::default()
        .with_frequency(Rate::from_hz(SD_SPI_HZ))
        .with_mode(esp_hal::spi::Mode::_0);
    let staging = match Spi::new(peripherals.SPI3, sd_spi_config) {
        Ok(sd_spi) => {
            let sd_spi = sd_spi
                .with_sck(peripherals.GPIO4)
                .with_mosi(peripherals.GPIO40)
                .with_miso(peripherals.GPIO41);
            match SdStaging::mount(sd_spi, sd_cs, Delay::new()) {
                Ok(staging) => Some(staging),
                Err(err) => {
                    info!("sd: card not found: {:?}", err);
                    None
                }
            }
        }
        Err(err) => {
            warn!("sd: spi config rejected: {:?}", err);
            None
        }
    };

    let mut store = ScheduleStore::open();

    let flash = match OtaFlash::new(FlashStorage::new(peripherals.FLASH)) {
        Ok(mut flash) => {
            if let Err(err) = flash.confirm_running() {
                warn!("ota: could not confirm running image: {:?}", err);
            }
            Some(flash)
        }
        Err(err) => {
            warn!("ota: no update slot: {:?}", err);
            None
        }
    };

    let clock = RtcClock::new(Rtc::new(peripherals.LPWR), UTC_OFFSET_SECS);
    let battery = AdcBattery::new(peripherals.ADC1, peripherals.GPIO1, BATTERY_DIVIDER);
    let appliance = BoardAppliance::new(
        display,
        delay,
        FRAMES.init(FrameBuffers::new()),
        clock,
        battery,
    );

    let radio = match esp_radio::init() {
        Ok(radio) => radio,
        Err(err) => {
            warn!("wifi: esp-radio init failed: {:?}", err);
            power::sleep_after_fault("radio init", fault_sleep_secs)
        }
    };
    let (wifi_controller, interfaces) =
        match esp_radio::wifi::new(&radio, peripherals.WIFI, esp_radio::wifi::Config::default()) {
            Ok(parts) => parts,
            Err(err) => {
                warn!("wifi: peripheral init failed: {:?}", err);
                power::sleep_after_fault("wifi init", fault_sleep_secs)
            }
        };

    let seed = 0x5A17_2B34_D099_EE11 ^ Instant::now().duration_since_epoch().as_micros();
    let (stack, mut net_runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        NET_RESOURCES.init(embassy_net::StackResources::<3>::new()),
        seed,
    );
    let http = HttpConnection::new(
        stack,
        SOCKET_RX.init([0; SOCKET_RX_BYTES]),
        SOCKET_TX.init([0; SOCKET_TX_BYTES]),
        UPDATE_SERVER,
    );
    let net = WifiTransport::new(wifi_controller, stack, http);

    let state = DeviceState::load(boot_kind, &mut store);
    let devices = Devices {
        net,
        delay: embassy_time::Delay,
        store,
        staging,
        flash,
        appliance,
    };
    let candidates = candidates();
    let mut orchestrator = Orchestrator::new(update_config, &candidates, devices, state);

    let report = match select(net_runner.run(), orchestrator.run_cycle()).await {
        Either::First(never) => never,
        Either::Second(report) => report,
    };
    info!(
        "boot: cycle done firmware={:?} content={:?}",
        report.firmware, report.content
    );

    let (mut devices, _) = orchestrator.into_parts();
    if let Some(staging) = devices.staging.take() {
        staging.unmount();
    }
    match report.end {
        CycleEnd::Reboot => power::reboot(),
        CycleEnd::Sleep { seconds } => {
            power::enter_deep_sleep(devices.appliance.clock_mut().rtc_mut(), seconds)
        }
    }
}
