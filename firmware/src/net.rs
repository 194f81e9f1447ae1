//! Wi-Fi station, IP stack, HTTPS and SNTP
//!
//! The radio is brought up lazily on the first connect, so wakes that render
//! from cache never pay for it. Requests go through reqwless over the embassy
//! TCP client with TLS. reqwless offers no certificate verification, so
//! [`Network::verifies_peers`] is false and the sync withholds activity
//! credentials unless `allow_unverified_tls` is set.
//!
//! Every exchange is bounded well below the RTC watchdog timeout; the sync
//! feeds the watchdog while it waits.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use embassy_executor::Spawner;
use embassy_net::dns::{DnsQueryType, DnsSocket};
use embassy_net::tcp::client::{TcpClient, TcpClientState};
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpEndpoint, Runner, Stack, StackResources};
use embassy_time::{Duration, with_timeout};
use embedded_io_async::{Read, Write};
use esp_hal::peripherals::WIFI;
use esp_hal::rng::Rng;
use esp_radio::wifi::{ClientConfig, Config as WifiConfig, ModeConfig, WifiController, WifiDevice};
use reqwless::client::{HttpClient, TlsConfig, TlsVerify};
use reqwless::request::{Method as HttpMethod, RequestBuilder};
use reqwless::response::Response;
use static_cell::StaticCell;
use wakeframe_core::net::{MAX_BODY_BYTES, Method, Network, Request, TransportError};
use wakeframe_core::sntp;

use crate::rtc::WATCHDOG_TIMEOUT_SECS;

pub const TLS_READ_BUF_SIZE: usize = 16640;
pub const TLS_WRITE_BUF_SIZE: usize = 4096;
/// Response head buffer
const RX_BUF_SIZE: usize = 4096;

/// Must stay under [`WATCHDOG_TIMEOUT_SECS`]
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const SNTP_TIMEOUT: Duration = Duration::from_secs(5);
const NTP_SERVER: &str = "pool.ntp.org";
const NTP_LOCAL_PORT: u16 = 50123;

const _: () = assert!(REQUEST_TIMEOUT.as_secs() < WATCHDOG_TIMEOUT_SECS);

type Client = TcpClient<'static, 1, 4096, 4096>;

static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
static TCP_STATE: StaticCell<TcpClientState<1, 4096, 4096>> = StaticCell::new();

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

struct Link {
    controller: WifiController<'static>,
    stack: Stack<'static>,
    tcp: Client,
    dns: DnsSocket<'static>,
}

pub struct WifiNetwork {
    spawner: Spawner,
    wifi: Option<WIFI<'static>>,
    rng: Rng,
    link: Option<Link>,
    tls_read: Box<[u8; TLS_READ_BUF_SIZE]>,
    tls_write: Box<[u8; TLS_WRITE_BUF_SIZE]>,
    rx: Box<[u8; RX_BUF_SIZE]>,
}

fn transport_error(e: reqwless::Error) -> TransportError {
    log::warn!("http: {:?}", e);
    match e {
        reqwless::Error::Dns => TransportError::Dns,
        reqwless::Error::Tls(_) => TransportError::Tls,
        reqwless::Error::InvalidUrl(_) => TransportError::InvalidUrl,
        reqwless::Error::ConnectionAborted => TransportError::Connect,
        _ => TransportError::Io,
    }
}

impl WifiNetwork {
    pub fn new(spawner: Spawner, wifi: WIFI<'static>, rng: Rng) -> Self {
        Self {
            spawner,
            wifi: Some(wifi),
            rng,
            link: None,
            tls_read: Box::new([0u8; TLS_READ_BUF_SIZE]),
            tls_write: Box::new([0u8; TLS_WRITE_BUF_SIZE]),
            rx: Box::new([0u8; RX_BUF_SIZE]),
        }
    }

    /// Radio, DHCP stack and sockets; once per boot
    fn bring_up(&mut self) -> Result<&mut Link, TransportError> {
        if self.link.is_none() {
            let wifi = self.wifi.take().ok_or(TransportError::Connect)?;
            log::info!("initializing radio");

            let radio = esp_radio::init().map_err(|e| {
                log::error!("radio init failed: {:?}", e);
                TransportError::Connect
            })?;
            let radio = RADIO.init(radio);

            let (controller, interfaces) =
                esp_radio::wifi::new(radio, wifi, WifiConfig::default()).map_err(|e| {
                    log::error!("wifi init failed: {:?}", e);
                    TransportError::Connect
                })?;

            let (stack, runner) = embassy_net::new(
                interfaces.sta,
                embassy_net::Config::dhcpv4(Default::default()),
                RESOURCES.init(StackResources::new()),
                self.rng.random() as u64,
            );
            self.spawner.spawn(net_task(runner)).ok();

            self.link = Some(Link {
                controller,
                stack,
                tcp: TcpClient::new(stack, TCP_STATE.init(TcpClientState::new())),
                dns: DnsSocket::new(stack),
            });
        }
        self.link.as_mut().ok_or(TransportError::Connect)
    }
}

impl Network for WifiNetwork {
    async fn begin_connect(&mut self, ssid: &str, password: &str) -> Result<(), TransportError> {
        let link = self.bring_up()?;
        let controller = &mut link.controller;

        let config = ModeConfig::Client(
            ClientConfig::default()
                .with_ssid(ssid.into())
                .with_password(password.into()),
        );
        controller.set_config(&config).map_err(|e| {
            log::error!("wifi config rejected: {:?}", e);
            TransportError::Connect
        })?;
        if !matches!(controller.is_started(), Ok(true)) {
            controller.start_async().await.map_err(|e| {
                log::error!("wifi start failed: {:?}", e);
                TransportError::Connect
            })?;
        }
        log::info!("connecting to {}", ssid);
        controller.connect().map_err(|e| {
            log::warn!("wifi connect failed: {:?}", e);
            TransportError::Connect
        })
    }

    fn verifies_peers(&self) -> bool {
        false
    }

    fn is_connected(&mut self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.stack.is_link_up() && link.stack.config_v4().is_some())
    }

    async fn network_time(&mut self) -> Result<u64, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let stack = self.link.as_ref().ok_or(TransportError::NotConnected)?.stack;
        with_timeout(SNTP_TIMEOUT, sntp_query(stack))
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    async fn request(
        &mut self,
        request: &Request<'_>,
        body: &mut Vec<u8>,
    ) -> Result<u16, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let seed = self.rng.random() as u64;
        let Some(link) = self.link.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        let tls = TlsConfig::new(
            seed,
            &mut self.tls_read[..],
            &mut self.tls_write[..],
            TlsVerify::None,
        );
        let mut client = HttpClient::new_with_tls(&link.tcp, &link.dns, tls);
        body.clear();
        with_timeout(
            REQUEST_TIMEOUT,
            exchange(&mut client, request, &mut self.rx[..], body),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
    }

    async fn shutdown(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if let Err(e) = link.controller.disconnect_async().await {
            log::debug!("disconnect: {:?}", e);
        }
        if let Err(e) = link.controller.stop_async().await {
            log::warn!("wifi stop failed: {:?}", e);
        }
        log::info!("wifi stopped");
    }
}

async fn exchange<'a>(
    client: &mut HttpClient<'a, Client, DnsSocket<'static>>,
    request: &Request<'_>,
    rx: &mut [u8],
    body: &mut Vec<u8>,
) -> Result<u16, TransportError> {
    let method = match request.method {
        Method::Get => HttpMethod::GET,
        Method::Post => HttpMethod::POST,
    };
    let authorization: Option<String> = request.bearer.map(|token| format!("Bearer {}", token));
    let mut headers: Vec<(&str, &str)> = Vec::new();
    if let Some(value) = authorization.as_deref() {
        headers.push(("Authorization", value));
    }
    if request.form.is_some() {
        headers.push(("Content-Type", "application/x-www-form-urlencoded"));
    }

    let handle = client
        .request(method, request.url)
        .await
        .map_err(transport_error)?;
    let mut handle = handle.headers(&headers);
    match request.form {
        Some(form) => {
            let mut handle = handle.body(form.as_bytes());
            let response = handle.send(rx).await.map_err(transport_error)?;
            collect(response, request.limit, body).await
        }
        None => {
            let response = handle.send(rx).await.map_err(transport_error)?;
            collect(response, request.limit, body).await
        }
    }
}

/// Copy the body into `body`, truncating at `limit` or failing past
/// [`MAX_BODY_BYTES`]
async fn collect<C>(
    response: Response<'_, '_, C>,
    limit: Option<usize>,
    body: &mut Vec<u8>,
) -> Result<u16, TransportError>
where
    C: Read + Write,
{
    let status = response.status.0;
    if limit.is_none() && response.content_length.is_some_and(|len| len > MAX_BODY_BYTES) {
        return Err(TransportError::TooLarge);
    }
    let cap = limit.unwrap_or(MAX_BODY_BYTES);
    let mut reader = response.body().reader();
    let mut chunk = [0u8; 512];
    loop {
        let n = reader.read(&mut chunk).await.map_err(transport_error)?;
        if n == 0 {
            break;
        }
        let room = cap - body.len();
        if n > room {
            if limit.is_none() {
                return Err(TransportError::TooLarge);
            }
            body.extend_from_slice(&chunk[..room]);
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    log::debug!("http {} with {} body bytes", status, body.len());
    Ok(status)
}

async fn sntp_query(stack: Stack<'static>) -> Result<u64, TransportError> {
    let addrs = stack
        .dns_query(NTP_SERVER, DnsQueryType::A)
        .await
        .map_err(|_| TransportError::Dns)?;
    let server = addrs.first().copied().ok_or(TransportError::Dns)?;

    let mut rx_meta = [PacketMetadata::EMPTY; 2];
    let mut rx_buf = [0u8; 128];
    let mut tx_meta = [PacketMetadata::EMPTY; 2];
    let mut tx_buf = [0u8; 128];
    let mut socket = UdpSocket::new(stack, &mut rx_meta, &mut rx_buf, &mut tx_meta, &mut tx_buf);
    socket.bind(NTP_LOCAL_PORT).map_err(|_| TransportError::Connect)?;

    socket
        .send_to(&sntp::request(), IpEndpoint::new(server, sntp::NTP_PORT))
        .await
        .map_err(|_| TransportError::Io)?;
    let mut reply = [0u8; sntp::PACKET_LEN];
    let (n, _) = socket
        .recv_from(&mut reply)
        .await
        .map_err(|_| TransportError::Io)?;
    sntp::parse_reply(&reply[..n]).map_err(|e| {
        log::warn!("sntp: {}", e);
        TransportError::Io
    })
}
