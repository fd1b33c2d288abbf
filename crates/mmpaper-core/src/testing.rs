//! Scripted collaborators shared by the unit tests.

use std::{
    collections::BTreeMap,
    string::{String, ToString},
    vec::Vec,
};

use embedded_hal_async::delay::DelayNs;

use crate::{
    cycle::Appliance,
    install::{Completion, FlashUpdater, StagingFs},
    network::{LinkDriver, NetworkCandidate},
    refresh::{RefreshKind, RefreshPanel},
    render::RenderError,
    status::StatusMessage,
    time::{WallClock, WallTime},
    transfer::{HttpClient, ResponseHead},
};

/// Delay that only counts.
#[derive(Debug, Default)]
pub struct MockDelay {
    elapsed_ns: u64,
}

impl MockDelay {
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ns / 1_000_000
    }
}

impl DelayNs for MockDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns += ns as u64;
    }

    async fn delay_us(&mut self, us: u32) {
        self.elapsed_ns += us as u64 * 1_000;
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.elapsed_ns += ms as u64 * 1_000_000;
    }
}

/// Canned response for one path.
#[derive(Clone, Debug)]
pub struct Route {
    path: &'static str,
    status: u16,
    body: Vec<u8>,
    declared: Option<u32>,
    date: Option<u32>,
    chunk: usize,
    stall: bool,
    refused: bool,
}

impl Route {
    pub fn ok(path: &'static str, body: &[u8]) -> Self {
        Self {
            path,
            status: 200,
            body: body.to_vec(),
            declared: Some(body.len() as u32),
            date: None,
            chunk: usize::MAX,
            stall: false,
            refused: false,
        }
    }

    pub fn status(path: &'static str, status: u16) -> Self {
        Self {
            status,
            declared: Some(0),
            ..Self::ok(path, &[])
        }
    }

    /// Connection fails before a response head arrives.
    pub fn refused(path: &'static str) -> Self {
        Self {
            refused: true,
            ..Self::ok(path, &[])
        }
    }

    pub fn dated(mut self, unix: u32) -> Self {
        self.date = Some(unix);
        self
    }

    /// Hands out at most `bytes` per read.
    pub fn chunked(mut self, bytes: usize) -> Self {
        self.chunk = bytes.max(1);
        self
    }

    pub fn declared_length(mut self, len: Option<u32>) -> Self {
        self.declared = len;
        self
    }

    /// Keeps the connection open with nothing to read once the body is out.
    pub fn stall_after_body(mut self) -> Self {
        self.stall = true;
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MockHttpError;

#[derive(Debug, Default)]
pub struct MockHttp {
    routes: Vec<Route>,
    requests: Vec<String>,
    /// Route index and body cursor of the open response.
    active: Option<(usize, usize)>,
    opened: u32,
    closed: u32,
}

impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    pub fn requests(&self) -> Vec<&str> {
        self.requests.iter().map(String::as_str).collect()
    }

    /// Every response that was opened was also closed.
    pub fn closed_all(&self) -> bool {
        self.active.is_none() && self.closed >= self.opened
    }
}

impl HttpClient for MockHttp {
    type Error = MockHttpError;

    async fn get(&mut self, path: &str) -> Result<ResponseHead, Self::Error> {
        self.requests.push(path.to_string());
        let Some(index) = self.routes.iter().position(|route| route.path == path) else {
            return Ok(ResponseHead {
                status: 404,
                content_length: Some(0),
                date_unix: None,
            });
        };
        let route = &self.routes[index];
        if route.refused {
            return Err(MockHttpError);
        }
        self.active = Some((index, 0));
        self.opened += 1;
        Ok(ResponseHead {
            status: route.status,
            content_length: route.declared,
            date_unix: route.date,
        })
    }

    async fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let Some((index, cursor)) = self.active.as_mut() else {
            return Ok(0);
        };
        let route = &self.routes[*index];
        let n = buf.len().min(route.chunk).min(route.body.len() - *cursor);
        buf[..n].copy_from_slice(&route.body[*cursor..*cursor + n]);
        *cursor += n;
        Ok(n)
    }

    fn is_connected(&self) -> bool {
        match self.active {
            Some((index, cursor)) => {
                let route = &self.routes[index];
                route.stall || cursor < route.body.len()
            }
            None => false,
        }
    }

    async fn close(&mut self) {
        if self.active.take().is_some() {
            self.closed += 1;
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MockLinkError;

/// Radio that associates with one access point after a number of polls.
#[derive(Debug, Default)]
pub struct MockLink {
    target: Option<&'static str>,
    polls_needed: u32,
    rejected: Vec<&'static str>,
    attempts: Vec<&'static str>,
    current: Option<&'static str>,
    polls: u32,
    pub powered_off: bool,
    pub abandons: u32,
}

impl MockLink {
    /// Links with `identifier` once `is_linked` has said no `polls` times.
    pub fn linking(identifier: &'static str, polls: u32) -> Self {
        Self {
            target: Some(identifier),
            polls_needed: polls,
            ..Self::default()
        }
    }

    pub fn never() -> Self {
        Self::default()
    }

    pub fn rejecting(mut self, identifier: &'static str) -> Self {
        self.rejected.push(identifier);
        self
    }

    pub fn attempts(&self) -> Vec<&str> {
        self.attempts.clone()
    }
}

impl LinkDriver for MockLink {
    type Error = MockLinkError;

    async fn begin(&mut self, candidate: &NetworkCandidate) -> Result<(), Self::Error> {
        self.attempts.push(candidate.identifier);
        self.powered_off = false;
        if self.rejected.contains(&candidate.identifier) {
            self.current = None;
            return Err(MockLinkError);
        }
        self.current = Some(candidate.identifier);
        self.polls = 0;
        Ok(())
    }

    fn is_linked(&mut self) -> bool {
        if self.current.is_none() || self.current != self.target {
            return false;
        }
        if self.polls >= self.polls_needed {
            return true;
        }
        self.polls += 1;
        false
    }

    async fn abandon(&mut self) {
        self.current = None;
        self.abandons += 1;
    }

    async fn power_off(&mut self) {
        self.current = None;
        self.powered_off = true;
    }
}

/// Link and HTTP transport behind one handle, as on the board.
#[derive(Debug, Default)]
pub struct MockNet {
    pub link: MockLink,
    pub http: MockHttp,
}

impl LinkDriver for MockNet {
    type Error = MockLinkError;

    async fn begin(&mut self, candidate: &NetworkCandidate) -> Result<(), Self::Error> {
        self.link.begin(candidate).await
    }

    fn is_linked(&mut self) -> bool {
        self.link.is_linked()
    }

    async fn abandon(&mut self) {
        self.link.abandon().await;
    }

    async fn power_off(&mut self) {
        self.link.power_off().await;
    }
}

impl HttpClient for MockNet {
    type Error = MockHttpError;

    async fn get(&mut self, path: &str) -> Result<ResponseHead, Self::Error> {
        if self.link.current.is_none() {
            return Err(MockHttpError);
        }
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

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MockFsError {
    NotFound,
    NotOpen,
    Injected,
}

/// Flat in-memory filesystem.
#[derive(Debug, Default)]
pub struct MockFs {
    pub files: BTreeMap<String, Vec<u8>>,
    open: Option<String>,
    /// Makes every `rename` fail without touching either file.
    pub fail_rename: bool,
}

impl MockFs {
    pub fn with_file(mut self, path: &str, bytes: &[u8]) -> Self {
        self.files.insert(path.to_string(), bytes.to_vec());
        self
    }

    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }
}

impl StagingFs for MockFs {
    type Error = MockFsError;

    fn create(&mut self, path: &str) -> Result<(), Self::Error> {
        self.files.insert(path.to_string(), Vec::new());
        self.open = Some(path.to_string());
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        let path = self.open.as_ref().ok_or(MockFsError::NotOpen)?;
        self.files
            .get_mut(path)
            .ok_or(MockFsError::NotFound)?
            .extend_from_slice(bytes);
        Ok(())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        self.open = None;
        Ok(())
    }

    fn size(&mut self, path: &str) -> Result<Option<u32>, Self::Error> {
        Ok(self.files.get(path).map(|bytes| bytes.len() as u32))
    }

    fn remove(&mut self, path: &str) -> Result<(), Self::Error> {
        self.files.remove(path);
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), Self::Error> {
        if self.fail_rename {
            return Err(MockFsError::Injected);
        }
        let bytes = self.files.remove(from).ok_or(MockFsError::NotFound)?;
        self.files.insert(to.to_string(), bytes);
        Ok(())
    }

    fn read_at(&mut self, path: &str, offset: u32, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let bytes = self.files.get(path).ok_or(MockFsError::NotFound)?;
        let start = (offset as usize).min(bytes.len());
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        Ok(n)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MockFlashError;

/// OTA slot in RAM.
#[derive(Debug)]
pub struct MockFlash {
    capacity: u32,
    pub image: Vec<u8>,
    pub began: bool,
    pub finalized: bool,
    /// Next boot targets the new slot. Set by `finalize`, cleared by `abort`.
    pub slot_activated: bool,
    pub aborts: u32,
    pub completion: Completion,
}

impl MockFlash {
    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            capacity,
            image: Vec::new(),
            began: false,
            finalized: false,
            slot_activated: false,
            aborts: 0,
            completion: Completion::Complete,
        }
    }
}

impl FlashUpdater for MockFlash {
    type Error = MockFlashError;

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn begin(&mut self, _len: u32) -> Result<(), Self::Error> {
        self.began = true;
        self.image.clear();
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), Self::Error> {
        if !self.began {
            return Err(MockFlashError);
        }
        self.image.extend_from_slice(chunk);
        Ok(())
    }

    fn finalize(&mut self) -> Result<Completion, Self::Error> {
        self.finalized = self.completion == Completion::Complete;
        self.slot_activated = true;
        Ok(self.completion)
    }

    fn abort(&mut self) {
        self.began = false;
        self.slot_activated = false;
        self.aborts += 1;
    }
}

/// Board services: settable clock and battery, recording panel.
#[derive(Debug, Default)]
pub struct MockAppliance {
    pub clock: Option<u32>,
    pub battery: u8,
    pub uptime_ms: u64,
    pub panel_fails: bool,
    pub refreshes: Vec<RefreshKind>,
    pub statuses: Vec<StatusMessage>,
    /// Bytes of every image drawn.
    pub drawn: Vec<Vec<u8>>,
    pub syncs: Vec<u32>,
}

impl MockAppliance {
    pub fn at(clock: Option<u32>, battery: u8) -> Self {
        Self {
            clock,
            battery,
            ..Self::default()
        }
    }

    /// First line of every status shown, in order.
    pub fn status_lines(&self) -> Vec<&str> {
        self.statuses
            .iter()
            .filter_map(|status| status.lines().next())
            .collect()
    }
}

impl WallClock for MockAppliance {
    fn now(&mut self) -> Option<WallTime> {
        self.clock.map(|unix| WallTime::from_unix(unix, 0))
    }

    fn sync(&mut self, unix: u32) {
        self.syncs.push(unix);
        self.clock = Some(unix);
    }
}

impl RefreshPanel for MockAppliance {
    type Error = ();

    fn refresh(&mut self, kind: RefreshKind) -> Result<(), Self::Error> {
        if self.panel_fails {
            return Err(());
        }
        self.refreshes.push(kind);
        Ok(())
    }
}

impl Appliance for MockAppliance {
    fn battery_percent(&mut self) -> u8 {
        self.battery
    }

    fn uptime_ms(&mut self) -> u64 {
        self.uptime_ms += 100;
        self.uptime_ms
    }

    fn draw_status(&mut self, message: &StatusMessage) {
        self.statuses.push(message.clone());
    }

    fn draw_content<F: StagingFs>(&mut self, fs: &mut F, path: &str) -> Result<(), RenderError> {
        let len = fs
            .size(path)
            .map_err(|_| RenderError::Storage)?
            .ok_or(RenderError::Missing)?;
        let mut bytes = std::vec![0u8; len as usize];
        let read = fs
            .read_at(path, 0, &mut bytes)
            .map_err(|_| RenderError::Storage)?;
        if read != bytes.len() || !bytes.starts_with(&[0xFF, 0xD8]) {
            return Err(RenderError::InvalidImage);
        }
        self.drawn.push(bytes);
        Ok(())
    }
}
