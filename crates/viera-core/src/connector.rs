// ── Connector lifecycle ──
//
// Owns one `Television` client per device and the background tasks that
// feed the queue: the dispatch tick, reachability polling, periodic SSDP
// discovery, and GENA event subscriptions. Device I/O never touches the
// registry or sink directly; everything flows through the queue and the
// consumer chain.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use viera_api::events;
use viera_api::{
    Action, AuthorizationResult, DeviceDescriptor, Discovery, EventListener, HdmiInput, Pairing,
    PairingState, Service, SsdpResponse, Subscription, Television, TelevisionEvent,
    TransportConfig,
};

use crate::config::{ConnectorConfig, Credentials, DeviceConfig};
use crate::consumers::{
    ConnectionStateConsumer, Consumers, DiscoveryConsumer, DispatchOutcome, PropertyStateConsumer,
};
use crate::error::CoreError;
use crate::model::{self, ConnectionState, DeviceId, Property, PropertyValue};
use crate::queue::{Queue, QueueMessage};
use crate::registry::DeviceRegistry;
use crate::sink::Sink;

const EVENT_CHANNEL_SIZE: usize = 64;
const DISCOVERY_CHANNEL_SIZE: usize = 16;
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(30);

// ── Connector ────────────────────────────────────────────────────────

/// Entry point for hosts.
///
/// Cheaply cloneable via `Arc<ConnectorInner>`. A connector runs once:
/// after [`stop()`](Self::stop) it drops every session and ignores late
/// callbacks, and a new connector must be built to run again.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

struct ConnectorInner {
    config: ConnectorConfig,
    transport: TransportConfig,
    registry: Arc<dyn DeviceRegistry>,
    queue: Queue,
    consumers: Consumers,
    discovery: Discovery,
    televisions: DashMap<DeviceId, Arc<Television>>,
    addresses: DashMap<IpAddr, DeviceId>,
    credentials: DashMap<DeviceId, Credentials>,
    observed: DashMap<DeviceId, ConnectionState>,
    subscriptions: DashMap<(DeviceId, Service), Subscription>,
    pairings: Mutex<HashMap<DeviceId, Pairing>>,
    event_addr: OnceLock<SocketAddr>,
    started: AtomicBool,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Connector {
    /// Build a connector for `config`. Does NOT start anything -- call
    /// [`start()`](Self::start) to spawn the background tasks.
    ///
    /// Configured devices are registered immediately.
    pub fn new(
        config: ConnectorConfig,
        registry: Arc<dyn DeviceRegistry>,
        sink: Arc<dyn Sink>,
    ) -> Result<Self, CoreError> {
        let transport = TransportConfig::default().with_timeout(config.timeout);
        let discovery = Discovery::new(&transport)?;

        let mut consumers = Consumers::new();
        consumers.register(DiscoveryConsumer::new(
            Arc::clone(&registry),
            Arc::clone(&sink),
        ));
        consumers.register(ConnectionStateConsumer::new(
            Arc::clone(&registry),
            Arc::clone(&sink),
        ));
        consumers.register(PropertyStateConsumer::new(Arc::clone(&registry), sink));

        let televisions = DashMap::new();
        let addresses = DashMap::new();
        let credentials = DashMap::new();
        for device in &config.devices {
            let television =
                Television::new(device.host, device.port, device.encrypted, &transport)?;
            televisions.insert(device.id.clone(), Arc::new(television));
            addresses.insert(device.host, device.id.clone());
            if let Some(creds) = &device.credentials {
                credentials.insert(device.id.clone(), creds.clone());
            }
            registry.upsert(configured_descriptor(device));
        }

        Ok(Self {
            inner: Arc::new(ConnectorInner {
                config,
                transport,
                registry,
                queue: Queue::new(),
                consumers,
                discovery,
                televisions,
                addresses,
                credentials,
                observed: DashMap::new(),
                subscriptions: DashMap::new(),
                pairings: Mutex::new(HashMap::new()),
                event_addr: OnceLock::new(),
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    pub fn queue(&self) -> &Queue {
        &self.inner.queue
    }

    pub fn registry(&self) -> &Arc<dyn DeviceRegistry> {
        &self.inner.registry
    }

    /// Address the NOTIFY listener is bound to, once started.
    pub fn event_addr(&self) -> Option<SocketAddr> {
        self.inner.event_addr.get().copied()
    }

    pub fn television(&self, device: &DeviceId) -> Option<Arc<Television>> {
        self.inner
            .televisions
            .get(device)
            .map(|r| Arc::clone(r.value()))
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the background tasks.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() || self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(CoreError::Runtime("connector can only be started once".into()));
        }

        let config = &self.inner.config;
        let cancel = self.inner.cancel.clone();
        let mut handles = self.inner.task_handles.lock().await;

        if let Some(bind) = config.event_bind {
            let listener = EventListener::bind(bind).await.map_err(|e| CoreError::Config {
                message: format!("cannot bind event listener on {bind}: {e}"),
            })?;
            let local_addr = listener.local_addr();
            let _ = self.inner.event_addr.set(local_addr);

            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
            handles.push(tokio::spawn(listener.run(tx, cancel.clone())));
            handles.push(tokio::spawn(event_task(self.clone(), rx, cancel.clone())));

            for entry in &self.inner.televisions {
                handles.push(self.spawn_subscriptions(
                    entry.key().clone(),
                    Arc::clone(entry.value()),
                    local_addr,
                ));
            }
        }

        handles.push(tokio::spawn(dispatch_task(
            self.clone(),
            config.dispatch_interval,
            cancel.clone(),
        )));
        handles.push(tokio::spawn(poll_task(
            self.clone(),
            config.poll_interval,
            cancel.clone(),
        )));
        if let Some(interval) = config.discovery_interval {
            handles.push(tokio::spawn(discovery_task(self.clone(), interval, cancel)));
        }

        info!(
            connector = %config.connector_id,
            devices = self.inner.televisions.len(),
            "connector started"
        );
        Ok(())
    }

    /// Cancel background work, release event subscriptions, and drop
    /// every session.
    ///
    /// Tasks are aborted, not awaited; anything they would still enqueue
    /// is discarded.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();

        for handle in self.inner.task_handles.lock().await.drain(..) {
            handle.abort();
        }

        let active: Vec<((DeviceId, Service), Subscription)> = self
            .inner
            .subscriptions
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        self.inner.subscriptions.clear();
        join_all(active.into_iter().map(|((device, service), subscription)| async move {
            if let Err(e) = subscription.unsubscribe().await {
                debug!(%device, ?service, error = %e, "unsubscribe failed");
            }
        }))
        .await;

        let televisions: Vec<Arc<Television>> = self
            .inner
            .televisions
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        for television in televisions {
            television.invalidate_session().await;
        }
        self.inner.pairings.lock().await.clear();

        info!(connector = %self.inner.config.connector_id, "connector stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    // ── Queue ────────────────────────────────────────────────────────

    /// Process one queued message through the consumer chain.
    pub fn dispatch_once(&self) -> DispatchOutcome {
        self.inner.consumers.dispatch(&self.inner.queue)
    }

    fn enqueue(&self, message: QueueMessage) {
        if self.inner.cancel.is_cancelled() {
            debug!(kind = %message.kind(), "connector stopped, dropping message");
            return;
        }
        self.inner.queue.enqueue(message);
    }

    fn enqueue_property(&self, device: &DeviceId, property: Property, value: PropertyValue) {
        self.enqueue(QueueMessage::ChannelPropertyStateChanged {
            connector: self.inner.config.connector_id.clone(),
            device: device.clone(),
            property,
            value,
        });
    }

    /// Record an observed state; enqueue a transition only if it changed.
    fn observe(&self, device: &DeviceId, state: ConnectionState) -> bool {
        let previous = self.inner.observed.insert(device.clone(), state);
        if previous == Some(state) {
            return false;
        }
        self.enqueue(QueueMessage::DeviceConnectionStateChanged {
            connector: self.inner.config.connector_id.clone(),
            device: device.clone(),
            state,
        });
        true
    }

    fn observed_state(&self, device: &DeviceId) -> ConnectionState {
        self.inner
            .observed
            .get(device)
            .map(|r| *r.value())
            .unwrap_or_default()
    }

    // ── Polling ──────────────────────────────────────────────────────

    /// Probe every television once and enqueue state changes.
    pub async fn poll_once(&self) {
        let televisions: Vec<(DeviceId, Arc<Television>)> = self
            .inner
            .televisions
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();

        let probes = televisions
            .iter()
            .map(|(device, television)| self.probe(device, television));
        let states = join_all(probes).await;

        for ((device, _), state) in televisions.iter().zip(states) {
            if self.observe(device, state) && state == ConnectionState::Connected {
                self.refresh_applications(device).await;
            }
        }
    }

    async fn probe(&self, device: &DeviceId, television: &Television) -> ConnectionState {
        let previous = self.observed_state(device);
        match television.is_turned_on().await {
            Ok(true) => {
                if television.has_session().await || self.restore_session(device, television).await
                {
                    ConnectionState::Connected
                } else {
                    ConnectionState::Unauthorized
                }
            }
            Ok(false) => ConnectionState::unreachable_after(previous),
            Err(e) => {
                warn!(%device, error = %e, "poll failed");
                ConnectionState::unreachable_after(previous)
            }
        }
    }

    async fn restore_session(&self, device: &DeviceId, television: &Television) -> bool {
        let Some(credentials) = self
            .inner
            .credentials
            .get(device)
            .map(|r| r.value().clone())
        else {
            return false;
        };

        match television
            .restore_session(&credentials.app_id, credentials.encryption_key)
            .await
        {
            Ok(_) => {
                info!(%device, "encrypted session restored");
                true
            }
            Err(e) => {
                warn!(%device, error = %e, "stored credentials rejected");
                false
            }
        }
    }

    /// Fetch the application list and re-announce the device with it.
    async fn refresh_applications(&self, device: &DeviceId) {
        let (Some(television), Some(record)) =
            (self.television(device), self.inner.registry.device(device))
        else {
            return;
        };

        match television.applications().await {
            Ok(applications) if applications != record.descriptor.applications => {
                let mut descriptor = record.descriptor;
                descriptor.applications = applications;
                self.enqueue(QueueMessage::DeviceDiscovered {
                    connector: self.inner.config.connector_id.clone(),
                    device: device.clone(),
                    descriptor,
                });
            }
            Ok(_) => {}
            Err(e) => debug!(%device, error = %e, "application list unavailable"),
        }
    }

    // ── Discovery ────────────────────────────────────────────────────

    /// Run one SSDP scan, adopting and announcing every device found.
    pub async fn discover_once(&self) -> Result<usize, CoreError> {
        let (tx, mut rx) = mpsc::channel(DISCOVERY_CHANNEL_SIZE);
        let discovery = self.inner.discovery.clone();
        let timeout = self.inner.config.discovery_timeout;
        let cancel = self.inner.cancel.child_token();

        let scan = async move { discovery.run(timeout, tx, cancel).await };
        let adopt = async {
            while let Some(descriptor) = rx.recv().await {
                self.adopt(descriptor).await;
            }
        };
        let (found, ()) = tokio::join!(scan, adopt);
        Ok(found?)
    }

    /// Resolve SSDP responses collected elsewhere and announce each
    /// distinct device once. Returns the number of devices announced.
    pub async fn announce(&self, responses: Vec<SsdpResponse>) -> usize {
        let mut announced = 0;
        for descriptor in self.inner.discovery.resolve(responses).await {
            if self.adopt(descriptor).await {
                announced += 1;
            }
        }
        announced
    }

    /// Take over a discovered device and enqueue its announcement.
    async fn adopt(&self, mut descriptor: DeviceDescriptor) -> bool {
        let configured = self
            .inner
            .addresses
            .get(&descriptor.ip)
            .map(|r| r.value().clone());

        let device = match configured {
            Some(device) if self.inner.televisions.contains_key(&device) => {
                // configured devices keep their id and encryption setting
                if let Some(television) = self.television(&device) {
                    descriptor.refine_encryption(television.is_encrypted());
                }
                descriptor.identifier = device.to_string();
                device
            }
            _ => {
                let device = DeviceId::new(descriptor.identifier.clone());
                if !self.inner.televisions.contains_key(&device) {
                    match Television::new(
                        descriptor.ip,
                        descriptor.port,
                        descriptor.encrypted,
                        &self.inner.transport,
                    ) {
                        Ok(television) => {
                            let television = Arc::new(television);
                            self.inner
                                .televisions
                                .insert(device.clone(), Arc::clone(&television));
                            self.inner.addresses.insert(descriptor.ip, device.clone());
                            self.subscribe_late(&device, television).await;
                        }
                        Err(e) => {
                            warn!(%device, error = %e, "cannot create client for discovered device");
                            return false;
                        }
                    }
                }
                device
            }
        };

        self.enqueue(QueueMessage::DeviceDiscovered {
            connector: self.inner.config.connector_id.clone(),
            device,
            descriptor,
        });
        true
    }

    // ── Events ───────────────────────────────────────────────────────

    fn spawn_subscriptions(
        &self,
        device: DeviceId,
        television: Arc<Television>,
        local_addr: SocketAddr,
    ) -> JoinHandle<()> {
        tokio::spawn(subscription_task(
            self.clone(),
            device,
            television,
            local_addr,
        ))
    }

    /// Subscribe a device adopted after start.
    async fn subscribe_late(&self, device: &DeviceId, television: Arc<Television>) {
        let Some(local_addr) = self.event_addr() else {
            return;
        };
        // checked under the lock so stop() cannot drain in between
        let mut handles = self.inner.task_handles.lock().await;
        if self.inner.cancel.is_cancelled() {
            return;
        }
        handles.push(self.spawn_subscriptions(device.clone(), television, local_addr));
    }

    fn handle_event(&self, event: TelevisionEvent) {
        let Some(device) = self
            .inner
            .addresses
            .get(&event.source)
            .map(|r| r.value().clone())
        else {
            debug!(source = %event.source, "event from unknown address");
            return;
        };

        for change in event.changes {
            let (property, value) = model::property_update(change);
            self.enqueue_property(&device, property, value);
        }
    }

    // ── Pairing ──────────────────────────────────────────────────────

    /// Ask `device` to display a pairing pin.
    pub async fn pair_request_pin(&self, device: &DeviceId) -> Result<(), CoreError> {
        let television = self.require_television(device)?;
        let mut pairing = television.pairing();
        pairing.request_pin(&self.inner.config.app_name).await?;
        self.inner
            .pairings
            .lock()
            .await
            .insert(device.clone(), pairing);
        info!(%device, "pairing pin requested");
        Ok(())
    }

    /// Submit the pin shown on `device` and install the resulting session.
    ///
    /// Returns the credentials to store for later restarts.
    pub async fn pair_authorize(
        &self,
        device: &DeviceId,
        pin: &str,
    ) -> Result<AuthorizationResult, CoreError> {
        let television = self.require_television(device)?;
        let Some(mut pairing) = self.inner.pairings.lock().await.remove(device) else {
            return Err(CoreError::InvalidArgument {
                message: format!("no pairing in progress for {device}; request a pin first"),
            });
        };

        let (session, authorization) = match pairing.authorize(pin).await {
            Ok(result) => result,
            Err(e) => {
                // a malformed pin leaves the handshake usable
                if pairing.state() == PairingState::PinDisplayed {
                    self.inner
                        .pairings
                        .lock()
                        .await
                        .insert(device.clone(), pairing);
                }
                return Err(e.into());
            }
        };

        television.install_session(session).await;
        self.inner.credentials.insert(
            device.clone(),
            Credentials {
                app_id: authorization.application_id.clone(),
                encryption_key: authorization.encryption_key.clone(),
            },
        );
        self.observe(device, ConnectionState::Connected);
        Ok(authorization)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Send `action` to `device`.
    ///
    /// Failures are also reported through the connection-state stream.
    pub async fn execute(&self, device: &DeviceId, action: Action) -> Result<(), CoreError> {
        if self.is_stopped() {
            return Err(CoreError::NotConnected {
                identifier: device.to_string(),
                reason: "connector stopped".into(),
            });
        }
        let television = self.require_television(device)?;

        match television.send(&action).await {
            Ok(()) => {
                for (property, value) in action_properties(&action) {
                    self.enqueue_property(device, property, value);
                }
                Ok(())
            }
            Err(e) => {
                if e.is_session_invalid() {
                    self.observe(device, ConnectionState::Unauthorized);
                } else if e.is_transient() {
                    let state = ConnectionState::unreachable_after(self.observed_state(device));
                    self.observe(device, state);
                }
                warn!(%device, ?action, error = %e, "command failed");
                Err(CoreError::from(e).for_device(device.as_str()))
            }
        }
    }

    fn require_television(&self, device: &DeviceId) -> Result<Arc<Television>, CoreError> {
        self.television(device)
            .ok_or_else(|| CoreError::DeviceNotFound {
                identifier: device.to_string(),
            })
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Drain one queue message per tick.
async fn dispatch_task(connector: Connector, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                connector.dispatch_once();
            }
        }
    }
}

/// Periodically probe every television.
async fn poll_task(connector: Connector, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => connector.poll_once().await,
        }
    }
}

/// Periodically re-run SSDP discovery.
async fn discovery_task(connector: Connector, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                match connector.discover_once().await {
                    Ok(found) => debug!(found, "discovery pass complete"),
                    Err(e) => warn!(error = %e, "discovery pass failed"),
                }
            }
        }
    }
}

/// Turn NOTIFY callbacks into property messages.
async fn event_task(
    connector: Connector,
    mut rx: mpsc::Receiver<TelevisionEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                connector.handle_event(event);
            }
        }
    }
}

/// Keep GENA subscriptions alive on both services of one television.
///
/// Active subscriptions are mirrored into the connector so `stop()` can
/// release them after this task is aborted.
async fn subscription_task(
    connector: Connector,
    device: DeviceId,
    television: Arc<Television>,
    local_addr: SocketAddr,
) {
    let Some(ip) = television.host() else {
        return;
    };
    let cancel = connector.inner.cancel.clone();
    let timeout = connector.inner.config.event_timeout;
    let active = &connector.inner.subscriptions;

    while !cancel.is_cancelled() {
        let mut subscriptions = Vec::new();
        match events::callback_url(local_addr, ip).await {
            Ok(callback) => {
                for service in [Service::NetworkControl, Service::RenderingControl] {
                    match Subscription::subscribe(television.soap(), service, &callback, timeout)
                        .await
                    {
                        Ok(subscription) => {
                            active.insert((device.clone(), service), subscription.clone());
                            subscriptions.push(subscription);
                        }
                        Err(e) => debug!(%device, ?service, error = %e, "subscribe failed"),
                    }
                }
            }
            Err(e) => warn!(%device, error = %e, "no callback route to television"),
        }

        // renew until one renewal fails, then start over
        let mut wait = RESUBSCRIBE_DELAY;
        while !subscriptions.is_empty() {
            wait = subscriptions
                .iter()
                .map(Subscription::renew_after)
                .min()
                .unwrap_or(RESUBSCRIBE_DELAY);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(wait) => {}
            }

            let mut failed = false;
            for subscription in &mut subscriptions {
                let key = (device.clone(), subscription.service());
                match subscription.renew().await {
                    Ok(()) => {
                        active.insert(key, subscription.clone());
                    }
                    Err(e) => {
                        debug!(%device, sid = subscription.sid(), error = %e, "renewal failed");
                        active.remove(&key);
                        failed = true;
                    }
                }
            }
            if failed {
                subscriptions.clear();
                wait = Duration::ZERO;
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(wait) => {}
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Descriptor for a configured device, until discovery provides a real one.
fn configured_descriptor(device: &DeviceConfig) -> DeviceDescriptor {
    DeviceDescriptor {
        identifier: device.id.to_string(),
        ip: device.host,
        port: device.port,
        name: device.name.clone().unwrap_or_else(|| device.id.to_string()),
        model: String::new(),
        manufacturer: "Panasonic".into(),
        serial: device.id.to_string(),
        encrypted: device.encrypted,
        applications: Vec::new(),
        hdmi: HdmiInput::standard(),
    }
}

/// Properties a successful action is known to have changed.
fn action_properties(action: &Action) -> Vec<(Property, PropertyValue)> {
    match action {
        Action::Key(key) => vec![(Property::RemoteKey, PropertyValue::Text(key.to_string()))],
        Action::LaunchApp(app) => vec![
            (Property::Application, PropertyValue::Text(app.clone())),
            (Property::InputSource, PropertyValue::Text(app.clone())),
        ],
        Action::SwitchHdmi(input) => vec![(
            Property::InputSource,
            PropertyValue::Text(format!("hdmi{input}")),
        )],
        Action::SetVolume(level) => vec![(Property::Volume, PropertyValue::Level(*level))],
        Action::SetMute(muted) => vec![(Property::Mute, PropertyValue::Bool(*muted))],
    }
}
