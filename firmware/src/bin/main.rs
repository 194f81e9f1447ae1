//! Wakeframe firmware - ESP32-S3 e-paper dashboard
//!
//! One wake cycle per boot: bring up the board, hand it to the controller,
//! and let it decide between syncing, rendering, idling on external power and
//! deep sleep. Settings come from the SD card and the USB command port.

#![no_std]
#![no_main]

extern crate alloc;

use core::cell::RefCell;

use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Delay, Timer};
use embedded_hal::delay::DelayNs as _;
use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};
use esp_alloc as _;
use esp_backtrace as _;
use esp_hal::{
    Blocking,
    clock::CpuClock,
    gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull},
    i2c::master::{Config as I2cConfig, I2c},
    ram,
    rng::Rng,
    rtc_cntl::Rtc,
    spi::{
        Mode,
        master::{Config as SpiConfig, Spi},
    },
    time::Rate,
    timer::timg::TimerGroup,
    usb_serial_jtag::UsbSerialJtag,
};
use wakeframe_core::command::CommandChannel;
use wakeframe_core::config::Variant;
use wakeframe_core::controller::{Board, Controller, Hardware, Shutdown};
use wakeframe_core::presence::PresenceMonitor;
use wakeframe_core::sync::Endpoints;
use wakeframe_firmware::epd::{Epd7in3e, RefreshMode};
use wakeframe_firmware::net::WifiNetwork;
use wakeframe_firmware::panel::Panel;
use wakeframe_firmware::pmu::Axp2101;
use wakeframe_firmware::port::HostPort;
use wakeframe_firmware::retained::RtcRetained;
use wakeframe_firmware::rtc::{self, DeepSleep, RtcClock, RtcWatchdog, SharedRtc};
use wakeframe_firmware::sense::SenseLines;
use wakeframe_firmware::store::SdConfigStore;

esp_bootloader_esp_idf::esp_app_desc!();

// When you are okay with using a nightly compiler it's better to use https://docs.rs/static_cell/2.1.0/static_cell/macro.make_static.html
macro_rules! mk_static {
    ($t:ty,$val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write(($val));
        x
    }};
}

#[cfg(feature = "environment")]
const VARIANT: Variant = Variant::Environment;
#[cfg(not(feature = "environment"))]
const VARIANT: Variant = Variant::Activity;

type SpiBus = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, NoDelay>;

struct Frame;

impl Hardware for Frame {
    type Delay = Delay;
    type Watchdog = RtcWatchdog;
    type Clock = RtcClock;
    type Signals = SenseLines;
    type Battery = Axp2101<I2c<'static, Blocking>>;
    type Power = DeepSleep;
    type Display = Panel<SpiBus, Input<'static>, Output<'static>, Output<'static>>;
    type Retained = RtcRetained;
    type Config = SdConfigStore<SpiBus, Delay>;
    type Network = WifiNetwork;
    type Port = HostPort;
    type ResetButton = Input<'static>;
    type Led = Output<'static>;
}

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    // Init logger first so we can see any early crashes
    esp_println::logger::init_logger_from_env();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    let trigger = rtc::wake_trigger();
    log::info!("boot, wake trigger {}", trigger.as_str());

    let rtc: &'static SharedRtc = mk_static!(SharedRtc, Mutex::new(RefCell::new(Rtc::new(peripherals.LPWR))));
    let watchdog = RtcWatchdog::start(rtc);

    // Button and LEDs first, the reset gesture is checked right away
    let key_input = Input::new(peripherals.GPIO4, InputConfig::default().with_pull(Pull::Up));
    let vbus_sense = Input::new(peripherals.GPIO5, InputConfig::default().with_pull(Pull::Down));
    let led_green = Output::new(peripherals.GPIO42, Level::High, OutputConfig::default());
    // Red LED off (active low)
    let _led_red = Output::new(peripherals.GPIO45, Level::High, OutputConfig::default());

    esp_alloc::heap_allocator!(#[ram(reclaimed)] size: 64 * 1024);
    esp_alloc::heap_allocator!(size: 36 * 1024);
    // Framebuffer and TLS buffers live in PSRAM
    esp_alloc::psram_allocator!(&peripherals.PSRAM, esp_hal::psram);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(
        timg0.timer0,
        #[cfg(target_arch = "riscv32")]
        esp_hal::interrupt::software::SoftwareInterruptControl::new(peripherals.SW_INTERRUPT)
            .software_interrupt0,
    );

    // ==================== SD card: CS=GPIO38, CLK=GPIO39, MISO=GPIO40, MOSI=GPIO41 ====================
    let sd_spi = Spi::new(
        peripherals.SPI2,
        SpiConfig::default()
            .with_frequency(Rate::from_mhz(20))
            .with_mode(Mode::_0),
    )
    .expect("SD SPI init failed")
    .with_sck(peripherals.GPIO39)
    .with_mosi(peripherals.GPIO41)
    .with_miso(peripherals.GPIO40);
    let sd_cs = Output::new(peripherals.GPIO38, Level::High, OutputConfig::default());
    let sd_device = ExclusiveDevice::new_no_delay(sd_spi, sd_cs).expect("SD CS init failed");
    let config_store = SdConfigStore::new(sd_device, Delay).expect("SD card required for settings");

    // ==================== AXP2101 PMIC: SDA=GPIO47, SCL=GPIO48 ====================
    let i2c = I2c::new(
        peripherals.I2C0,
        I2cConfig::default().with_frequency(Rate::from_khz(400)),
    )
    .expect("I2C init failed")
    .with_sda(peripherals.GPIO47)
    .with_scl(peripherals.GPIO48);
    let mut pmu = Axp2101::new(i2c);
    if let Err(e) = pmu.configure() {
        log::warn!("PMIC config skipped (may be pre-configured): {:?}", e);
    }
    // Power rails settle
    Delay.delay_ms(100);

    // ==================== E-paper on SPI3: DC=GPIO8, CS=GPIO9, SCK=GPIO10, MOSI=GPIO11, RST=GPIO12, BUSY=GPIO13 ====================
    let epd_spi = Spi::new(
        peripherals.SPI3,
        SpiConfig::default()
            .with_frequency(Rate::from_mhz(10))
            .with_mode(Mode::_0),
    )
    .expect("EPD SPI init failed")
    .with_sck(peripherals.GPIO10)
    .with_mosi(peripherals.GPIO11);
    let epd_cs = Output::new(peripherals.GPIO9, Level::High, OutputConfig::default());
    let epd_device = ExclusiveDevice::new_no_delay(epd_spi, epd_cs).expect("EPD CS init failed");
    let busy = Input::new(peripherals.GPIO13, InputConfig::default().with_pull(Pull::Up));
    let dc = Output::new(peripherals.GPIO8, Level::Low, OutputConfig::default());
    let rst = Output::new(peripherals.GPIO12, Level::High, OutputConfig::default());
    let epd = Epd7in3e::new(epd_device, busy, dc, rst, &mut Delay, RefreshMode::Fast)
        .expect("EPD init failed");

    let board: Board<Frame> = Board {
        delay: Delay,
        watchdog,
        clock: RtcClock::new(rtc),
        presence: PresenceMonitor::new(SenseLines::new(vbus_sense)),
        battery: pmu,
        power: DeepSleep::new(rtc),
        display: Panel::new(epd),
        retained: RtcRetained::take().expect("retained slot claimed twice"),
        config_store,
        network: WifiNetwork::new(spawner, peripherals.WIFI, Rng::new()),
        commands: CommandChannel::new(HostPort::new(UsbSerialJtag::new(peripherals.USB_DEVICE))),
        reset_button: key_input,
        led: led_green,
    };

    let mut controller = Controller::new(board, VARIANT, Endpoints::DEFAULT);
    match controller.run(trigger).await {
        Shutdown::Restarted => log::error!("restart returned"),
        Shutdown::PoweredOff => log::error!("power off returned"),
    }
    // Deep sleep and reset never return; if they did, start over
    Timer::after_millis(100).await;
    esp_hal::system::software_reset()
}
