//! The state-machine controller itself: owns one [`ServerState`] per pool
//! member, drives `addDevicesToBeLogged`/`tagDeviceDiscontinued` RPCs
//! against logger instances, reacts to topology events from the owning
//! [`SignalSlotable`]'s tracker, and runs the periodic sanity check.
//!
//! Everything that mutates [`ManagerState`] does so from inside a future
//! posted to `strand`, so the three per-server sets stay disjoint without
//! needing to reason about interleaving (see [`crate::state::ServerState`]).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use karabo_data::{Container, Timestamp, Value};
use karabo_net::{Strand, TopologyEvent};

use crate::config::Config;
use crate::error::LoggerManagerResult;
use crate::persistence::{self, Blocklist, LoggerMap};
use crate::state::{ServerPhase, ServerState};
use crate::topology_check::{self, CheckSummary};

/// Instance type string advertised by a pool member capable of hosting a
/// data logger. Any other tracked instance is treated as a device that
/// may need to be logged.
pub const SERVER_INSTANCE_TYPE: &str = "DataLoggerServer";
pub const LOGGER_INSTANCE_TYPE: &str = "DataLogger";

pub fn logger_instance_id(server_id: &str) -> String {
    format!("DataLogger-{server_id}")
}

fn server_id_from_logger_instance(instance_id: &str) -> Option<&str> {
    instance_id.strip_prefix("DataLogger-")
}

struct ManagerState {
    servers: HashMap<String, ServerState>,
    server_order: Vec<String>,
    round_robin_cursor: usize,
    device_to_server: HashMap<String, String>,
    device_class: HashMap<String, String>,
    empty_timestamp_streak: HashMap<String, u32>,
    logger_map: LoggerMap,
    blocklist: Blocklist,
    last_check: Option<CheckSummary>,
    last_check_started: Option<Timestamp>,
    last_check_done: Option<Timestamp>,
}

impl ManagerState {
    fn effective_blocked(&self, device_id: &str, class_id: Option<&str>) -> bool {
        if self.blocklist.device_ids.contains(device_id) {
            return true;
        }
        class_id.is_some_and(|c| self.blocklist.class_ids.contains(c))
    }

    fn server_mut(&mut self, server_id: &str) -> &mut ServerState {
        if !self.servers.contains_key(server_id) {
            self.server_order.push(server_id.to_string());
            self.servers.insert(server_id.to_string(), ServerState::new(server_id));
        }
        self.servers.get_mut(server_id).unwrap()
    }

    /// Round-robin among known servers for a never-before-seen device.
    fn pick_server(&mut self) -> Option<String> {
        if self.server_order.is_empty() {
            return None;
        }
        let picked = self.server_order[self.round_robin_cursor % self.server_order.len()].clone();
        self.round_robin_cursor = self.round_robin_cursor.wrapping_add(1);
        Some(picked)
    }
}

/// Assigns devices to logger servers, supervises their liveness, and
/// periodically checks that what a logger claims to be logging still
/// matches reality. One instance per `karabo-logger-managerd` process,
/// itself a [`karabo_net::SignalSlotable`] client of both the server pool
/// and the devices it logs.
pub struct LoggerManager {
    owner: Arc<karabo_net::SignalSlotable>,
    config: Config,
    strand: Arc<Strand>,
    state: Arc<Mutex<ManagerState>>,
}

impl LoggerManager {
    pub fn new(owner: Arc<karabo_net::SignalSlotable>, config: Config) -> LoggerManagerResult<Arc<Self>> {
        let logger_map = persistence::load_logger_map(&config.loggermap_path)?;
        let blocklist = persistence::load_blocklist(&config.blocklist_path)?;

        let mut device_to_server = HashMap::new();
        let mut servers = HashMap::new();
        let mut server_order = Vec::new();
        for (key, server_id) in logger_map.0.iter() {
            let Some(device_id) = key.strip_prefix("DataLogger-") else { continue };
            device_to_server.insert(device_id.to_string(), server_id.clone());
            servers.entry(server_id.clone()).or_insert_with(|| {
                server_order.push(server_id.clone());
                ServerState::new(server_id.clone())
            });
        }

        Ok(Arc::new(Self {
            owner,
            config,
            strand: Arc::new(Strand::new()),
            state: Arc::new(Mutex::new(ManagerState {
                servers,
                server_order,
                round_robin_cursor: 0,
                device_to_server,
                device_class: HashMap::new(),
                empty_timestamp_streak: HashMap::new(),
                logger_map,
                blocklist,
                last_check: None,
                last_check_started: None,
                last_check_done: None,
            })),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start reacting to topology events and run the periodic sanity
    /// check on its own cadence. Returns once both background tasks are
    /// spawned; it does not block.
    pub fn start(self: &Arc<Self>) {
        self.spawn_topology_watcher();
        self.spawn_sanity_check_loop();
    }

    fn spawn_topology_watcher(self: &Arc<Self>) {
        let this = self.clone();
        let mut events = self.owner.tracker().subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TopologyEvent::InstanceNew(inst)) => {
                        let this = this.clone();
                        let id = inst.instance_id.clone();
                        let kind = inst.instance_type.clone();
                        this.strand.clone().post(async move { this.on_instance_new(id, kind).await });
                    }
                    Ok(TopologyEvent::InstanceGone(id)) => {
                        let this = this.clone();
                        this.strand.clone().post(async move { this.on_instance_gone(id).await });
                    }
                    Err(_) => break,
                }
            }
        });
    }

    fn spawn_sanity_check_loop(self: &Arc<Self>) {
        let this = self.clone();
        let interval = Duration::from_secs(self.config.topology_check_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.run_sanity_check().await;
            }
        });
    }

    async fn on_instance_new(self: Arc<Self>, instance_id: String, instance_type: String) {
        if instance_type == SERVER_INSTANCE_TYPE {
            self.handle_server_discovered(&instance_id).await;
        } else if instance_type == LOGGER_INSTANCE_TYPE {
            if let Some(server_id) = server_id_from_logger_instance(&instance_id) {
                self.handle_logger_discovered(server_id.to_string()).await;
            }
        } else {
            self.handle_device_discovered(instance_id, None).await;
        }
    }

    async fn on_instance_gone(self: Arc<Self>, instance_id: String) {
        let is_server = self.state.lock().unwrap().servers.contains_key(&instance_id);
        if is_server {
            self.handle_server_gone(&instance_id).await;
            return;
        }
        if let Some(server_id) = server_id_from_logger_instance(&instance_id) {
            if self.state.lock().unwrap().servers.contains_key(server_id) {
                self.handle_logger_gone(server_id.to_string()).await;
                return;
            }
        }
        self.handle_device_gone(&instance_id).await;
    }

    /// OFFLINE -> INSTANTIATING, then issue the instantiate RPC to the
    /// server and fold its outcome back through [`Self::handle_logger_discovered`].
    async fn handle_server_discovered(self: &Arc<Self>, server_id: &str) {
        {
            let mut state = self.state.lock().unwrap();
            let server = state.server_mut(server_id);
            if server.phase != ServerPhase::Offline {
                return;
            }
            server.phase = ServerPhase::Instantiating;
        }
        info!(server = server_id, "server discovered, instantiating logger");
        self.request_instantiate(server_id).await;
    }

    async fn request_instantiate(self: &Arc<Self>, server_id: &str) {
        let result = self
            .owner
            .request(server_id, "slotInstantiateLogger")
            .timeout(Duration::from_millis(self.owner.config().default_request_timeout_ms))
            .request(vec![Value::String(logger_instance_id(server_id))])
            .await;
        match result {
            Ok(args) => {
                let outcome = args.first().and_then(Value::as_str).unwrap_or("failed");
                if outcome == "started" || outcome == "alreadyExists" {
                    self.handle_logger_discovered(server_id.to_string()).await;
                } else {
                    warn!(server = server_id, outcome, "logger instantiate reported failure, staying INSTANTIATING");
                }
            }
            Err(e) => warn!(server = server_id, error = %e, "instantiate request failed, staying INSTANTIATING"),
        }
    }

    /// INSTANTIATING (or an unsolicited discovery) -> RUNNING, then flush
    /// whatever accumulated in the backlog while offline.
    async fn handle_logger_discovered(self: &Arc<Self>, server_id: String) {
        {
            let mut state = self.state.lock().unwrap();
            let server = state.server_mut(&server_id);
            server.phase = ServerPhase::Running;
        }
        info!(server = %server_id, "logger running, flushing backlog");
        self.flush_backlog(&server_id).await;
    }

    async fn handle_logger_gone(self: &Arc<Self>, server_id: String) {
        let still_running = {
            let mut state = self.state.lock().unwrap();
            let server = state.server_mut(&server_id);
            if server.phase != ServerPhase::Running {
                return;
            }
            server.collapse_to_backlog();
            server.phase = ServerPhase::Instantiating;
            true
        };
        if still_running {
            warn!(server = %server_id, "logger gone, re-instantiating");
            self.request_instantiate(&server_id).await;
        }
    }

    async fn handle_server_gone(self: &Arc<Self>, server_id: &str) {
        let mut state = self.state.lock().unwrap();
        let server = state.server_mut(server_id);
        server.collapse_to_backlog();
        server.phase = ServerPhase::Offline;
        warn!(server = server_id, "server gone");
    }

    async fn handle_device_discovered(self: &Arc<Self>, device_id: String, class_id: Option<String>) {
        let (server_id, should_add, blocked) = {
            let mut state = self.state.lock().unwrap();
            if state.effective_blocked(&device_id, class_id.as_deref()) {
                (None, false, true)
            } else {
                if let Some(class_id) = &class_id {
                    state.device_class.insert(device_id.clone(), class_id.clone());
                }
                let server_id = match state.device_to_server.get(&device_id).cloned() {
                    Some(id) => id,
                    None => {
                        let Some(picked) = state.pick_server() else {
                            return;
                        };
                        state.device_to_server.insert(device_id.clone(), picked.clone());
                        state.logger_map.assign(&device_id, &picked);
                        picked
                    }
                };
                let server = state.server_mut(&server_id);
                server.backlog.insert(device_id.clone());
                let running = server.phase == ServerPhase::Running;
                (Some(server_id), running, false)
            }
        };
        if blocked {
            debug!(device = %device_id, "device is blocklisted, ignoring discovery");
            return;
        }
        self.persist_logger_map();
        if let Some(server_id) = server_id {
            if should_add {
                self.add_devices_to_be_logged(&server_id, &[device_id]).await;
            }
        }
    }

    async fn handle_device_gone(self: &Arc<Self>, device_id: &str) {
        let (server_id, was_running) = {
            let mut state = self.state.lock().unwrap();
            let Some(server_id) = state.device_to_server.get(device_id).cloned() else {
                return;
            };
            let server = state.server_mut(&server_id);
            server.remove_everywhere(device_id);
            (server_id, server.phase == ServerPhase::Running)
        };
        if was_running {
            self.tag_device_discontinued(&server_id, device_id).await;
        }
    }

    /// `addDevicesToBeLogged`: move the whole current backlog into
    /// `being_added`, ask the logger, and settle the outcome.
    async fn flush_backlog(self: &Arc<Self>, server_id: &str) {
        let backlog: Vec<String> = {
            let mut state = self.state.lock().unwrap();
            let server = state.server_mut(server_id);
            server.backlog.drain().collect()
        };
        if backlog.is_empty() {
            return;
        }
        self.add_devices_to_be_logged(server_id, &backlog).await;
    }

    async fn add_devices_to_be_logged(self: &Arc<Self>, server_id: &str, device_ids: &[String]) {
        {
            let mut state = self.state.lock().unwrap();
            let server = state.server_mut(server_id);
            for id in device_ids {
                server.backlog.remove(id);
                server.being_added.insert(id.clone());
            }
        }
        let logger_id = logger_instance_id(server_id);
        let result = self
            .owner
            .request(&logger_id, "slotAddDevicesToBeLogged")
            .timeout(Duration::from_millis(self.owner.config().default_request_timeout_ms))
            .request(vec![Value::VectorString(device_ids.to_vec())])
            .await;

        let mut state = self.state.lock().unwrap();
        let server = state.server_mut(server_id);
        match result {
            Ok(_already_logged) => {
                for id in device_ids {
                    server.being_added.remove(id);
                    server.devices.insert(id.clone());
                }
                debug!(server = server_id, count = device_ids.len(), "devices confirmed logged");
            }
            Err(e) => {
                for id in device_ids {
                    server.being_added.remove(id);
                    server.backlog.insert(id.clone());
                }
                warn!(server = server_id, error = %e, "addDevicesToBeLogged failed, devices returned to backlog");
                if server.phase == ServerPhase::Running {
                    let backlog: Vec<String> = server.backlog.iter().cloned().collect();
                    drop(state);
                    self.retry_add_devices(server_id, backlog).await;
                }
            }
        }
    }

    /// Re-drive a failed `addDevicesToBeLogged` immediately, without
    /// recursing through `self` while still holding the state lock.
    async fn retry_add_devices(self: &Arc<Self>, server_id: &str, device_ids: Vec<String>) {
        if device_ids.is_empty() {
            return;
        }
        Box::pin(self.add_devices_to_be_logged(server_id, &device_ids)).await;
    }

    async fn tag_device_discontinued(self: &Arc<Self>, server_id: &str, device_id: &str) {
        let logger_id = logger_instance_id(server_id);
        if let Err(e) = self
            .owner
            .request(&logger_id, "slotTagDeviceDiscontinued")
            .timeout(Duration::from_millis(self.owner.config().default_request_timeout_ms))
            .request(vec![Value::String(device_id.to_string())])
            .await
        {
            warn!(server = server_id, device = device_id, error = %e, "tagDeviceDiscontinued failed");
        }
    }

    /// Force a stop+start of one device's logging: tag it discontinued,
    /// then re-add it, as the periodic check does for a stale or
    /// disagreeing device.
    async fn force_restart_device(self: &Arc<Self>, server_id: &str, device_id: &str) {
        self.tag_device_discontinued(server_id, device_id).await;
        self.add_devices_to_be_logged(server_id, &[device_id.to_string()]).await;
    }

    fn persist_logger_map(&self) {
        let state = self.state.lock().unwrap();
        if let Err(e) = persistence::save_logger_map(&self.config.loggermap_path, &state.logger_map) {
            warn!(error = %e, "failed to persist logger map");
        }
    }

    fn persist_blocklist(&self) {
        let state = self.state.lock().unwrap();
        if let Err(e) = persistence::save_blocklist(&self.config.blocklist_path, &state.blocklist) {
            warn!(error = %e, "failed to persist blocklist");
        }
    }

    /// `blocklist.deviceIds`/`blocklist.classIds` reconfiguration: devices
    /// newly blocked are stopped, devices newly unblocked are started.
    pub async fn reconfigure_blocklist(self: &Arc<Self>, blocklist: Blocklist) {
        let (newly_blocked, newly_unblocked) = {
            let mut state = self.state.lock().unwrap();
            let previous = state.blocklist.clone();
            let tracked: Vec<(String, Option<String>)> =
                state.device_to_server.keys().map(|id| (id.clone(), state.device_class.get(id).cloned())).collect();

            let was_blocked = |id: &str, class: Option<&str>, list: &Blocklist| -> bool {
                list.device_ids.contains(id) || class.is_some_and(|c| list.class_ids.contains(c))
            };

            let mut newly_blocked = Vec::new();
            let mut newly_unblocked = Vec::new();
            for (id, class) in &tracked {
                let was = was_blocked(id, class.as_deref(), &previous);
                let now = was_blocked(id, class.as_deref(), &blocklist);
                if !was && now {
                    newly_blocked.push(id.clone());
                } else if was && !now {
                    newly_unblocked.push(id.clone());
                }
            }
            state.blocklist = blocklist;
            (newly_blocked, newly_unblocked)
        };
        self.persist_blocklist();

        for device_id in newly_blocked {
            self.handle_device_gone(&device_id).await;
        }
        for device_id in newly_unblocked {
            self.handle_device_discovered(device_id, None).await;
        }
    }

    /// Backing accessor for the `loggerMap` read-only property.
    pub fn get_logger_map(&self) -> LoggerMap {
        self.state.lock().unwrap().logger_map.clone()
    }

    pub fn server_phase(&self, server_id: &str) -> Option<ServerPhase> {
        self.state.lock().unwrap().servers.get(server_id).map(|s| s.phase)
    }

    pub fn server_state_snapshot(&self, server_id: &str) -> Option<ServerState> {
        self.state.lock().unwrap().servers.get(server_id).cloned()
    }

    pub fn last_check_summary(&self) -> Option<CheckSummary> {
        self.state.lock().unwrap().last_check.clone()
    }

    /// `topologyCheck.slotForceCheck`: run the sanity check immediately,
    /// outside its normal cadence.
    pub async fn force_check(self: &Arc<Self>) {
        self.run_sanity_check().await;
    }

    async fn run_sanity_check(self: &Arc<Self>) {
        let started = Timestamp::now();
        self.state.lock().unwrap().last_check_started = Some(started);

        let (running_servers, offline_count): (Vec<String>, usize) = {
            let state = self.state.lock().unwrap();
            let running = state.servers.iter().filter(|(_, s)| s.phase == ServerPhase::Running).map(|(id, _)| id.clone()).collect();
            let offline = state.servers.values().filter(|s| s.phase == ServerPhase::Offline).count();
            (running, offline)
        };

        let mut summary = CheckSummary { offline_loggers: offline_count, ..CheckSummary::default() };
        for server_id in running_servers {
            topology_check::check_one_server(self, &server_id, &mut summary).await;
        }

        let done = Timestamp::now();
        info!(
            offline = summary.offline_loggers,
            logger_query_failures = summary.logger_query_failures,
            empty_timestamp_devices = summary.empty_timestamp_devices.len(),
            forced = summary.forced_restarts.len(),
            detail_requests = summary.detail_requests,
            device_query_failures = summary.device_query_failures,
            stopped = summary.stopped_devices.len(),
            "topology check finished: {}",
            summary.render_text()
        );
        let mut state = self.state.lock().unwrap();
        state.last_check_done = Some(done);
        state.last_check = Some(summary);
    }

    pub(crate) fn owner(&self) -> &Arc<karabo_net::SignalSlotable> {
        &self.owner
    }

    pub(crate) fn lag_tolerance(&self) -> Duration {
        Duration::from_secs(self.config.lag_tolerance_secs())
    }

    pub(crate) fn tolerance_logged(&self) -> Duration {
        Duration::from_secs(self.config.tolerance_logged_secs)
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.owner.config().default_request_timeout_ms)
    }

    pub(crate) fn mark_empty_timestamp(&self, device_id: &str) -> u32 {
        let mut state = self.state.lock().unwrap();
        let streak = state.empty_timestamp_streak.entry(device_id.to_string()).or_insert(0);
        *streak += 1;
        *streak
    }

    pub(crate) fn clear_empty_timestamp(&self, device_id: &str) {
        self.state.lock().unwrap().empty_timestamp_streak.remove(device_id);
    }

    pub(crate) fn is_device_recorded_as_logged(&self, server_id: &str, device_id: &str) -> bool {
        self.state.lock().unwrap().servers.get(server_id).is_some_and(|s| s.devices.contains(device_id))
    }

    pub(crate) async fn force_restart_device_public(self: &Arc<Self>, server_id: &str, device_id: &str) {
        self.force_restart_device(server_id, device_id).await;
    }

    pub(crate) async fn tag_device_discontinued_public(self: &Arc<Self>, server_id: &str, device_id: &str) {
        self.tag_device_discontinued(server_id, device_id).await;
    }
}

/// Scan a configuration [`Container`] for the most recent `timestamp`
/// attribute among its leaves, recursing into nested containers but not
/// into vectors of containers (table rows), per the sanity check's rule.
pub fn most_recent_timestamp(container: &Container) -> Option<Timestamp> {
    let mut latest: Option<Timestamp> = None;
    for (_key, value, attrs) in container.iter() {
        if let Some(Value::String(iso)) = attrs.get("timestamp") {
            if let Some(ts) = parse_iso8601_seconds(iso) {
                latest = Some(latest.map_or(ts, |l| l.max(ts)));
            }
        }
        if let Some(nested) = value.as_container() {
            if let Some(ts) = most_recent_timestamp(nested) {
                latest = Some(latest.map_or(ts, |l| l.max(ts)));
            }
        }
    }
    latest
}

/// Parse just enough of an ISO-8601 UTC stamp (`YYYY-MM-DDTHH:MM:SS`
/// prefix) to compare freshness; fractional seconds are not needed for
/// the tolerance comparisons the sanity check makes.
pub(crate) fn parse_iso8601_seconds(s: &str) -> Option<Timestamp> {
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 14 {
        return None;
    }
    let y: i64 = digits[0..4].parse().ok()?;
    let mo: i64 = digits[4..6].parse().ok()?;
    let d: i64 = digits[6..8].parse().ok()?;
    let h: i64 = digits[8..10].parse().ok()?;
    let mi: i64 = digits[10..12].parse().ok()?;
    let se: i64 = digits[12..14].parse().ok()?;
    let days = days_from_civil(y, mo, d);
    let secs = days * 86400 + h * 3600 + mi * 60 + se;
    Some(Timestamp::new(secs, 0))
}

fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_with_timestamp(c: &mut Container, key: &str, iso: &str) {
        c.set(key, 1.0f64).unwrap();
        c.set_attribute(key, "timestamp", iso);
    }

    #[test]
    fn logger_instance_id_round_trips_through_the_prefix() {
        assert_eq!(logger_instance_id("S1"), "DataLogger-S1");
        assert_eq!(server_id_from_logger_instance("DataLogger-S1"), Some("S1"));
        assert_eq!(server_id_from_logger_instance("S1"), None);
    }

    #[test]
    fn most_recent_timestamp_recurses_into_nested_containers_only() {
        let mut root = Container::new();
        leaf_with_timestamp(&mut root, "a", "2026-07-27T10:00:00.000000000Z");
        let mut nested = Container::new();
        leaf_with_timestamp(&mut nested, "b", "2026-07-27T12:00:00.000000000Z");
        root.set("nested", nested).unwrap();

        // A table row (vector of containers) must not be descended into.
        let mut row = Container::new();
        leaf_with_timestamp(&mut row, "c", "2099-01-01T00:00:00.000000000Z");
        root.set("table", vec![row]).unwrap();

        let latest = most_recent_timestamp(&root).unwrap();
        assert_eq!(latest.to_iso8601(), "2026-07-27T12:00:00.000000000Z");
    }

    #[test]
    fn container_without_any_timestamp_attribute_yields_none() {
        let mut c = Container::new();
        c.set("a", 1i32).unwrap();
        assert!(most_recent_timestamp(&c).is_none());
    }
}
