//! Wi-Fi station link and the HTTP transport that rides on it.

pub mod http;

use embassy_net::Stack;
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiError};
use log::{info, warn};
use mmpaper_core::{
    network::{LinkDriver, NetworkCandidate},
    transfer::{HttpClient, ResponseHead},
};

pub use http::{HttpConnection, HttpError, ServerConfig};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LinkError {
    Config(WifiError),
    Start(WifiError),
    Connect(WifiError),
}

/// One radio, one socket. Implements both halves of the network seam.
pub struct WifiTransport<'d> {
    controller: WifiController<'d>,
    stack: Stack<'d>,
    http: HttpConnection<'d>,
}

impl<'d> WifiTransport<'d> {
    pub fn new(
        controller: WifiController<'d>,
        stack: Stack<'d>,
        http: HttpConnection<'d>,
    ) -> Self {
        Self {
            controller,
            stack,
            http,
        }
    }
}

impl LinkDriver for WifiTransport<'_> {
    type Error = LinkError;

    async fn begin(&mut self, candidate: &NetworkCandidate) -> Result<(), Self::Error> {
        let client = ClientConfig::default()
            .with_ssid(candidate.identifier.into())
            .with_password(candidate.secret.into());
        self.controller
            .set_config(&ModeConfig::Client(client))
            .map_err(LinkError::Config)?;

        if !self.controller.is_started().unwrap_or(false) {
            self.controller
                .start_async()
                .await
                .map_err(LinkError::Start)?;
        }

        // Only kicks off association; the caller's poll loop owns the deadline.
        self.controller.connect().map_err(|err| {
            info!("wifi: connect to {} failed: {:?}", candidate.identifier, err);
            LinkError::Connect(err)
        })
    }

    fn is_linked(&mut self) -> bool {
        matches!(self.controller.is_connected(), Ok(true)) && self.stack.is_config_up()
    }

    async fn abandon(&mut self) {
        self.http.forget_server();
        if let Err(err) = self.controller.disconnect_async().await {
            warn!("wifi: disconnect failed: {:?}", err);
        }
    }

    async fn power_off(&mut self) {
        self.http.close().await;
        let _ = self.controller.disconnect_async().await;
        if let Err(err) = self.controller.stop_async().await {
            warn!("wifi: stop failed: {:?}", err);
        }
        info!("wifi: radio off");
    }
}

impl HttpClient for WifiTransport<'_> {
    type Error = HttpError;

    async fn get(&mut self, path: &str) -> Result<ResponseHead, Self::Error> {
        self.http.get(path).await
    }

    async fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.http.read_available(buf).await
    }

    fn is_connected(&self) -> bool {
        self.http.is_connected()
    }

    async fn close(&mut self) {
        self.http.close().await;
    }
}
