//! # Router
//!
//! Everything that happens to a frame after a link delivers it.
//!
//! Master frames are counted, logged, checked for clock lag, applied to
//! the vehicle state, forwarded verbatim to every output and finally
//! handed to the loaded modules. Output frames go to the primary master.

use bytes::Bytes;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::context::ProxyContext;
use crate::error::Result;
use crate::link::pump::now_us;
use crate::link::{HealthTransition, LinkHealth, LinkInput, LINK_SILENCE_TIMEOUT};
use crate::mavlink::encoder::{
    encode_frame, encode_gcs_heartbeat_payload, encode_request_data_stream_payload,
    encode_statustext_payload, FrameHeader,
};
use crate::mavlink::protocol::*;
use crate::mavlink::{Frame, MavMessage, MavVersion};
use crate::module::ModuleRegistry;
use crate::periodic::StreamRateLatch;
use crate::settings::{
    SettingValue, ALTREADOUT, BATTWARN, CHECKDELAY, MAVFWD, MAVFWD_RATE, SHOWNOISE, STREAMRATE,
    STREAMRATE2, TARGET_COMPONENT, TARGET_SYSTEM,
};
use crate::state::{StateEvent, Thresholds};
use crate::telemetry::LogHandle;

/// Backward jump in `time_boot_ms` treated as an autopilot clock wrap
pub const CLOCK_WRAP_MS: u32 = 30_000;

/// Messages kept out of the vehicle state while their link lags
///
/// Several links usually carry the same telemetry; applying the stale
/// copy would make readouts jump back and forth.
pub const DELAYED_MESSAGES: &[u32] = &[
    MSG_ID_MISSION_CURRENT,
    MSG_ID_SYS_STATUS,
    MSG_ID_VFR_HUD,
    MSG_ID_GPS_RAW_INT,
    MSG_ID_SCALED_PRESSURE,
    MSG_ID_GLOBAL_POSITION_INT,
    MSG_ID_NAV_CONTROLLER_OUTPUT,
];

/// Per-link traffic counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    /// Frames received per master
    pub master_in: Vec<u64>,
    /// Frames received per output
    pub output_in: Vec<u64>,
    /// Frames forwarded per output
    pub forwarded: Vec<u64>,
    /// Bad-data records from any link
    pub bad_data: u64,
}

fn bump(counts: &mut Vec<u64>, index: usize) {
    if counts.len() <= index {
        counts.resize(index + 1, 0);
    }
    counts[index] += 1;
}

/// Case-insensitive glob match supporting `*` and `?`
///
/// # Examples
///
/// ```
/// use mav_proxy::router::glob_match;
///
/// assert!(glob_match("GPS*", "GPS_RAW_INT"));
/// assert!(glob_match("vfr_hud", "VFR_HUD"));
/// assert!(!glob_match("GPS?", "GPS_RAW_INT"));
/// ```
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().map(|c| c.to_ascii_uppercase()).collect();
    let t: Vec<char> = text.chars().map(|c| c.to_ascii_uppercase()).collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

/// Synthetic tlog record standing in for bytes that could not be framed
///
/// A STATUSTEXT from the proxy's own ids keeps the log parseable while
/// still showing where the stream was corrupt.
pub fn bad_data_record(source_system: u8, source_component: u8, data: &[u8], reason: &str) -> Result<Bytes> {
    let text = format!("BAD_DATA {} ({} bytes)", reason, data.len());
    let header = FrameHeader {
        version: MavVersion::V1,
        seq: 0,
        system_id: source_system,
        component_id: source_component,
    };
    encode_frame(header, MSG_ID_STATUSTEXT, &encode_statustext_payload(MAV_SEVERITY_ERROR, &text))
}

#[derive(Debug, Default)]
pub struct Router {
    log: Option<LogHandle>,
    highest_msec: u32,
    watch: Option<String>,
    counters: Counters,
    stream_rates: StreamRateLatch,
}

impl Router {
    pub fn new(log: Option<LogHandle>) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Highest `time_boot_ms` seen on any master
    pub fn highest_msec(&self) -> u32 {
        self.highest_msec
    }

    pub fn watch(&self) -> Option<&str> {
        self.watch.as_deref()
    }

    /// Echo message types matching `pattern`; `None` stops watching
    pub fn set_watch(&mut self, pattern: Option<String>) {
        self.watch = pattern;
    }

    /// Forget counters, clock tracking and sent stream rates
    pub fn reset(&mut self) {
        self.counters = Counters::default();
        self.highest_msec = 0;
        self.stream_rates.clear();
    }

    /// Handle one item read from master `index`
    pub fn handle_master_input(
        &mut self,
        ctx: &mut ProxyContext,
        modules: &mut ModuleRegistry,
        index: usize,
        input: LinkInput,
        now: Instant,
    ) {
        match input {
            LinkInput::Raw(bytes) => {
                if index == ctx.primary_link() {
                    if let Some(log) = &self.log {
                        log.log_raw(bytes);
                    }
                }
            }
            LinkInput::Frame(frame) => self.handle_master_frame(ctx, modules, index, frame, now),
            LinkInput::BadData {
                data,
                reason,
                received_us,
            } => self.handle_bad_data(ctx, index, &data, &reason, received_us),
            LinkInput::TransportUp(description) => info!("link {} up: {}", index + 1, description),
            LinkInput::TransportDown(reason) => {
                warn!("link {} transport failed: {}", index + 1, reason);
                let transition = ctx
                    .links_mut()
                    .master_mut(index)
                    .and_then(|link| link.mark_transport_failed());
                if let Some(transition) = transition {
                    ctx.record_link_health(index, transition);
                }
            }
        }
    }

    fn handle_master_frame(
        &mut self,
        ctx: &mut ProxyContext,
        modules: &mut ModuleRegistry,
        index: usize,
        mut frame: Frame,
        now: Instant,
    ) {
        let stamp = *frame.timestamp_us.get_or_insert_with(now_us);

        let Some(link) = ctx.links_mut().master_mut(index) else {
            debug!("Frame for unknown master {}", index + 1);
            return;
        };
        link.record_receipt(&frame);
        let transition = link.note_message(now, frame.message_id);
        bump(&mut self.counters.master_in, index);

        if let Some(transition) = transition {
            if matches!(transition, HealthTransition::Established | HealthTransition::Recovered) {
                self.stream_rates.forget(index);
            }
            ctx.record_link_health(index, transition);
        }
        if frame.message_id == MSG_ID_HEARTBEAT {
            if let Some(event) = ctx.state_mut().note_master_alive() {
                ctx.record_state_event(event);
            }
        }

        if let Some(log) = &self.log {
            log.log_frame(index, stamp, frame.raw().clone());
        }

        let delayed = ctx.settings().flag(CHECKDELAY) && self.check_delay(ctx, index, &frame);
        let suppressed = delayed && DELAYED_MESSAGES.contains(&frame.message_id);
        let msg = MavMessage::decode(&frame);

        if suppressed {
            debug!("link {} delayed, holding back {}", index + 1, frame.name());
        } else {
            self.update_state(ctx, &frame, &msg, now);
        }
        self.show_watched(ctx, index, &frame);
        self.forward_to_outputs(ctx, &frame);

        if !suppressed {
            modules.dispatch_message(ctx, index, &frame, &msg);
        }
    }

    /// Track autopilot clocks across masters; returns whether `index` lags
    fn check_delay(&mut self, ctx: &mut ProxyContext, index: usize, frame: &Frame) -> bool {
        let masters = ctx.links().masters().len();
        let Some(link) = ctx.links_mut().master_mut(index) else {
            return false;
        };
        if frame.message_id == MSG_ID_GLOBAL_POSITION_INT {
            return link.link_delayed();
        }
        let Some(msec) = frame.time_boot_ms() else {
            return link.link_delayed();
        };

        if u64::from(msec) + u64::from(CLOCK_WRAP_MS) < u64::from(link.highest_msec()) {
            info!("link {}: time_boot_ms {} after {}", index + 1, msec, link.highest_msec());
            self.highest_msec = msec;
            for master in ctx.links_mut().masters_mut() {
                master.set_link_delayed(false);
                master.set_highest_msec(msec);
            }
            ctx.announce("Time has wrapped");
            return false;
        }

        link.set_highest_msec(msec);
        if msec > self.highest_msec {
            self.highest_msec = msec;
        }
        let delayed = msec < self.highest_msec && masters > 1;
        link.set_link_delayed(delayed);
        delayed
    }

    fn update_state(&mut self, ctx: &mut ProxyContext, frame: &Frame, msg: &MavMessage, now: Instant) {
        let thresholds = Thresholds {
            battery_warning: ctx.settings().int(BATTWARN),
            altitude_readout: ctx.settings().int(ALTREADOUT),
        };
        ctx.state_mut().record(frame, now);
        for event in ctx.state_mut().apply(frame, msg, thresholds) {
            if let StateEvent::TargetDiscovered { system, component } = event {
                ctx.settings_mut().store(TARGET_SYSTEM, SettingValue::Int(system as i64));
                ctx.settings_mut().store(TARGET_COMPONENT, SettingValue::Int(component as i64));
            }
            ctx.record_state_event(event);
        }

        if let MavMessage::StatusText(status) = msg {
            if frame.system_id == ctx.target_system() {
                ctx.announce(format!("AP: {}", status.text));
            }
        }
    }

    fn show_watched(&self, ctx: &mut ProxyContext, index: usize, frame: &Frame) {
        let Some(pattern) = &self.watch else {
            return;
        };
        if glob_match(pattern, frame.name()) {
            ctx.console().writeln(format!(
                "< {} link {} from {}:{} seq {} len {}",
                frame.name(),
                index + 1,
                frame.system_id,
                frame.component_id,
                frame.seq,
                frame.payload().len()
            ));
        }
    }

    fn forward_to_outputs(&mut self, ctx: &mut ProxyContext, frame: &Frame) {
        if frame.message_id == MSG_ID_REQUEST_DATA_STREAM && !ctx.settings().flag(MAVFWD_RATE) {
            return;
        }
        for (i, output) in ctx.links_mut().outputs_mut().iter_mut().enumerate() {
            match output.write(frame.raw().clone()) {
                Ok(()) => bump(&mut self.counters.forwarded, i),
                Err(e) => debug!("{}", e),
            }
        }
    }

    fn handle_bad_data(&mut self, ctx: &mut ProxyContext, index: usize, data: &[u8], reason: &str, received_us: u64) {
        self.counters.bad_data += 1;
        if let Some(link) = ctx.links_mut().master_mut(index) {
            link.record_bad_data();
        }

        if let Some(log) = &self.log {
            match bad_data_record(ctx.source_system(), ctx.source_component(), data, reason) {
                Ok(record) => log.log_frame(index, received_us, record),
                Err(e) => debug!("Bad data record not logged: {}", e),
            }
        }

        if ctx.settings().flag(SHOWNOISE) {
            ctx.console()
                .writeln(format!("link {}: bad data ({}) {:02X?}", index + 1, reason, data));
        }
    }

    /// Handle one item read from output `index`
    pub fn handle_output_input(&mut self, ctx: &mut ProxyContext, index: usize, input: LinkInput) {
        match input {
            LinkInput::Frame(frame) => {
                bump(&mut self.counters.output_in, index);
                if !ctx.settings().flag(MAVFWD) {
                    return;
                }
                if frame.message_id == MSG_ID_REQUEST_DATA_STREAM && !ctx.settings().flag(MAVFWD_RATE) {
                    debug!("output {}: stream rate request not forwarded", index + 1);
                    return;
                }
                if let Some(master) = ctx.links_mut().primary_mut() {
                    if let Err(e) = master.write(frame.raw().clone()) {
                        debug!("{}", e);
                    }
                }
            }
            LinkInput::BadData { reason, .. } => {
                self.counters.bad_data += 1;
                debug!("output {}: bad data ({})", index + 1, reason);
            }
            LinkInput::Raw(_) => {}
            LinkInput::TransportUp(description) => info!("output {} up: {}", index + 1, description),
            LinkInput::TransportDown(reason) => warn!("output {} transport failed: {}", index + 1, reason),
        }
    }

    /// Declare silent masters down, and announce when every master is
    pub fn check_links(&mut self, ctx: &mut ProxyContext, now: Instant) {
        let transitions: Vec<(usize, HealthTransition)> = ctx
            .links_mut()
            .masters_mut()
            .iter_mut()
            .enumerate()
            .filter_map(|(i, link)| link.check_silence(now, LINK_SILENCE_TIMEOUT).map(|t| (i, t)))
            .collect();
        for (index, transition) in transitions {
            ctx.record_link_health(index, transition);
        }

        if ctx.links().all_masters_silent(now, LINK_SILENCE_TIMEOUT) {
            if let Some(event) = ctx.state_mut().note_all_silent() {
                ctx.record_state_event(event);
            }
        }
    }

    /// Send our GCS heartbeat on every master
    pub fn send_heartbeats(&mut self, ctx: &mut ProxyContext) {
        let (system, component) = (ctx.source_system(), ctx.source_component());
        let payload = encode_gcs_heartbeat_payload();
        for link in ctx.links_mut().masters_mut() {
            if let Err(e) = link.send_message(system, component, MSG_ID_HEARTBEAT, &payload) {
                debug!("{}", e);
            }
        }
    }

    /// Ask each master for its stream rate when the wanted rate changed
    ///
    /// The primary master gets `streamrate`, the others `streamrate2`.
    /// Nothing is sent until the target system is known.
    pub fn send_stream_rates(&mut self, ctx: &mut ProxyContext) {
        let target_system = ctx.target_system();
        if target_system == 0 {
            return;
        }
        let target_component = ctx.target_component();
        let primary = ctx.primary_link();
        let rates = (ctx.settings().int(STREAMRATE), ctx.settings().int(STREAMRATE2));
        let (system, component) = (ctx.source_system(), ctx.source_component());

        for (i, link) in ctx.links_mut().masters_mut().iter_mut().enumerate() {
            // Only a link that is talking is worth asking
            if link.health() != LinkHealth::Healthy {
                continue;
            }
            let rate = if i == primary { rates.0 } else { rates.1 };
            let rate = rate.clamp(-1, i64::from(u16::MAX)) as i32;
            if !self.stream_rates.should_send(i, rate, target_system) {
                continue;
            }
            let payload = encode_request_data_stream_payload(
                target_system,
                target_component,
                MAV_DATA_STREAM_ALL,
                rate as u16,
                true,
            );
            debug!("link {}: requesting stream rate {}", i + 1, rate);
            if let Err(e) = link.send_message(system, component, MSG_ID_REQUEST_DATA_STREAM, &payload) {
                debug!("{}", e);
                self.stream_rates.forget(i);
            }
        }
    }
}
