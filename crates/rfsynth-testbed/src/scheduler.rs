//! # Real-Time Timeline Replay
//!
//! Every tx channel with events gets its own thread and its own device
//! handle. The threads share nothing but the [`MissionEpoch`]; every command
//! is issued as `epoch + event.start_s`, so a late thread still transmits on
//! time as long as it issues the command before the instant arrives.
//!
//! Per channel, in time order:
//!
//! 1. skip the event if `previous_stop + guard > start`
//! 2. retune at the event instant if the frequency changed
//! 3. upload the payload if the file changed
//! 4. timed start, wait, stop
//! 5. `previous_stop = start + duration`

use rfsynth_core::io::read_cf32_file;
use rfsynth_core::types::normalize_peak;
use rfsynth_core::MissionEpoch;
use rfsynth_sim::{DriverRegistry, RadioDevice, RadioRole};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::broadcast::{broadcast_reports, broadcast_schedule, BroadcastSummary, ZmqPublisher};
use crate::config::{validate_tx_config, TestbedOptions, TxConfig};
use crate::error::{TestbedError, TestbedResult};
use crate::report::ground_truth_file;
use crate::timeline::{load_timeline, Timeline, TimelineEvent};

/// Minimum gap between the end of one transmission and the next start.
pub const GUARD_INTERVAL_S: f64 = 0.007;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Executed,
    /// The previous transmission on the channel had not cleared the guard
    Skipped { previous_stop_s: f64 },
}

/// Counts for one channel after its timeline is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelSummary {
    pub radio: usize,
    pub channel: usize,
    pub executed: usize,
    pub skipped: usize,
}

/// Per-channel replay state.
#[derive(Debug)]
pub struct ChannelScheduler {
    radio: usize,
    channel: usize,
    epoch: MissionEpoch,
    guard_interval_s: f64,
    previous_stop_s: Option<f64>,
    previous_frequency: Option<f64>,
    previous_payload: Option<PathBuf>,
    executed: usize,
    skipped: usize,
}

impl ChannelScheduler {
    pub fn new(radio: usize, channel: usize, epoch: MissionEpoch) -> Self {
        Self {
            radio,
            channel,
            epoch,
            guard_interval_s: GUARD_INTERVAL_S,
            previous_stop_s: None,
            previous_frequency: None,
            previous_payload: None,
            executed: 0,
            skipped: 0,
        }
    }

    pub fn with_guard_interval(mut self, guard_interval_s: f64) -> Self {
        self.guard_interval_s = guard_interval_s;
        self
    }

    /// Whether `event` starts before the previous transmission cleared.
    pub fn collides(&self, event: &TimelineEvent) -> bool {
        self.previous_stop_s
            .is_some_and(|stop| stop + self.guard_interval_s > event.start_s)
    }

    /// Play one event. Blocks until the transmission has finished.
    pub fn run_event(
        &mut self,
        device: &mut dyn RadioDevice,
        event: &TimelineEvent,
    ) -> TestbedResult<EventOutcome> {
        if let Some(previous_stop_s) = self.previous_stop_s.filter(|_| self.collides(event)) {
            // Dropped, not deferred
            warn!(
                radio = self.radio,
                channel = self.channel,
                row = event.row,
                name = %event.name,
                start_s = event.start_s,
                previous_stop_s,
                "Skipping event, previous transmission still on air"
            );
            self.skipped += 1;
            return Ok(EventOutcome::Skipped { previous_stop_s });
        }

        let at = self.epoch.at(event.start_s);

        if self.previous_frequency != Some(event.frequency) {
            device.timed_retune(event.frequency, at, self.channel)?;
            self.previous_frequency = Some(event.frequency);
        }

        if self.previous_payload.as_deref() != Some(event.payload.as_path()) {
            let samples = load_payload(&event.payload)?;
            device.set_channel_payload(self.channel, &samples)?;
            self.previous_payload = Some(event.payload.clone());
        }

        device.timed_start(at)?;
        device.wait()?;
        device.stop()?;
        debug!(
            radio = self.radio,
            channel = self.channel,
            row = event.row,
            start_s = event.start_s,
            "Event played"
        );

        self.previous_stop_s = Some(event.stop_s());
        self.executed += 1;
        Ok(EventOutcome::Executed)
    }

    /// Play every event in order and report the counts.
    pub fn run(
        &mut self,
        device: &mut dyn RadioDevice,
        events: &[TimelineEvent],
    ) -> TestbedResult<ChannelSummary> {
        for event in events {
            self.run_event(device, event)?;
        }
        info!(
            radio = self.radio,
            channel = self.channel,
            transmitted = self.executed,
            skipped = self.skipped,
            "Channel timeline finished"
        );
        Ok(self.summary())
    }

    pub fn summary(&self) -> ChannelSummary {
        ChannelSummary {
            radio: self.radio,
            channel: self.channel,
            executed: self.executed,
            skipped: self.skipped,
        }
    }
}

/// Read a payload and normalize it to unit peak.
fn load_payload(path: &Path) -> TestbedResult<Vec<rfsynth_core::IQSample>> {
    let mut samples = read_cf32_file(path).map_err(|e| TestbedError::io(path, e))?;
    if samples.is_empty() {
        return Err(TestbedError::config(format!(
            "Payload {} is empty",
            path.display()
        )));
    }
    normalize_peak(&mut samples, 1.0);
    Ok(samples)
}

/// Outcome of one channel's thread.
#[derive(Debug)]
pub struct ContextResult {
    pub radio: usize,
    pub channel: usize,
    pub result: TestbedResult<ChannelSummary>,
}

/// Per-channel event lists, read from each channel's `metadata` timeline.
pub fn plan_contexts(tx: &TxConfig) -> TestbedResult<Vec<(usize, usize, Vec<TimelineEvent>)>> {
    let mut timelines: HashMap<PathBuf, Timeline> = HashMap::new();
    let mut contexts = Vec::new();

    for (radio_index, radio) in tx.radios.iter().enumerate() {
        for (channel_index, channel) in radio.channels.iter().enumerate() {
            let Some(path) = channel.iq_stream.metadata.as_ref() else {
                debug!(radio = radio_index, channel = channel_index, "No timeline for channel");
                continue;
            };
            if !timelines.contains_key(path) {
                timelines.insert(path.clone(), load_timeline(path)?);
            }
            let events = timelines[path].for_channel(radio_index, channel_index);
            if events.is_empty() {
                debug!(
                    radio = radio_index,
                    channel = channel_index,
                    "Timeline has no events for channel"
                );
                continue;
            }
            contexts.push((radio_index, channel_index, events));
        }
    }
    Ok(contexts)
}

/// Ground-truth handling that accompanies a replay.
#[derive(Debug, Clone, Default)]
pub struct GroundTruthOptions {
    /// Report with times relative to the mission epoch
    pub report: PathBuf,
    /// Where the prepared report goes; `<stem>_offset.json` beside it if unset
    pub output: Option<PathBuf>,
    /// Signal report fields overwritten with `no_answer`
    pub no_answer_fields: Vec<String>,
    /// Publish each report on this endpoint when it starts
    pub broadcast: Option<String>,
}

/// Everything a replay produced.
#[derive(Debug)]
pub struct ReplayOutcome {
    pub epoch: MissionEpoch,
    pub contexts: Vec<ContextResult>,
    /// Prepared ground-truth file
    pub ground_truth: Option<PathBuf>,
    pub broadcast: Option<TestbedResult<BroadcastSummary>>,
}

/// Replay every tx channel's timeline in real time.
///
/// Returns one result per channel context. A failure in one context is
/// logged and reported without stopping the others; only configuration
/// errors found before any thread starts are returned as `Err`.
pub fn run_realtime(
    tx: &TxConfig,
    options: &TestbedOptions,
    drivers: &DriverRegistry,
) -> TestbedResult<Vec<ContextResult>> {
    run_replay(tx, options, drivers, None).map(|outcome| outcome.contexts)
}

/// Replay with optional ground truth.
///
/// The ground truth is moved onto the mission epoch and saved before any
/// thread starts. When a broadcast endpoint is set, a publisher thread runs
/// alongside the channel threads; its failure does not affect them.
pub fn run_replay(
    tx: &TxConfig,
    options: &TestbedOptions,
    drivers: &DriverRegistry,
    ground_truth: Option<&GroundTruthOptions>,
) -> TestbedResult<ReplayOutcome> {
    validate_tx_config(tx)?;
    let contexts = plan_contexts(tx)?;
    let epoch = MissionEpoch::starting_in(options.start_lead());

    let prepared = match ground_truth {
        Some(gt) => {
            let (path, doc) =
                ground_truth_file(&gt.report, gt.output.as_deref(), epoch, &gt.no_answer_fields)?;
            Some((path, doc, gt.broadcast.clone()))
        }
        None => None,
    };

    if contexts.is_empty() {
        warn!("No timeline events for any tx channel");
    } else {
        info!(
            contexts = contexts.len(),
            epoch_s = epoch.origin().as_secs_f64(),
            lead_s = options.start_lead_s,
            "Starting real-time replay"
        );
    }

    let (contexts, broadcast) = std::thread::scope(|scope| {
        let broadcaster = match &prepared {
            Some((_, doc, Some(endpoint))) => Some(spawn_broadcast(scope, doc, endpoint)),
            _ => None,
        };
        let results = run_contexts(tx, options, drivers, epoch, contexts);
        let broadcast = broadcaster.map(|handle| match handle.map(|h| h.join()) {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(TestbedError::Panicked {
                name: "broadcast".to_string(),
                message: panic_message(panic.as_ref()),
            }),
            Err(e) => Err(e),
        });
        (results, broadcast)
    });

    Ok(ReplayOutcome {
        epoch,
        contexts,
        ground_truth: prepared.map(|(path, _, _)| path),
        broadcast,
    })
}

type BroadcastHandle<'scope> =
    TestbedResult<std::thread::ScopedJoinHandle<'scope, TestbedResult<BroadcastSummary>>>;

fn spawn_broadcast<'scope, 'env>(
    scope: &'scope std::thread::Scope<'scope, 'env>,
    doc: &'env Value,
    endpoint: &'env str,
) -> BroadcastHandle<'scope> {
    let name = "broadcast".to_string();
    std::thread::Builder::new()
        .name(name.clone())
        .spawn_scoped(scope, move || {
            let schedule = broadcast_schedule(doc)?;
            let mut publisher = ZmqPublisher::bind(endpoint).map_err(|e| {
                error!(endpoint, error = %e, "Ground-truth broadcast unavailable");
                e
            })?;
            Ok(broadcast_reports(&schedule, &mut publisher))
        })
        .map_err(|source| TestbedError::Spawn { name, source })
}

fn run_contexts(
    tx: &TxConfig,
    options: &TestbedOptions,
    drivers: &DriverRegistry,
    epoch: MissionEpoch,
    contexts: Vec<(usize, usize, Vec<TimelineEvent>)>,
) -> Vec<ContextResult> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = contexts
            .into_iter()
            .map(|(radio, channel, events)| {
                let name = context_name(radio, channel);
                let handle = std::thread::Builder::new()
                    .name(name.clone())
                    .spawn_scoped(scope, move || {
                        run_context(tx, options, drivers, epoch, radio, channel, &events)
                    })
                    .map_err(|source| TestbedError::Spawn { name, source });
                (radio, channel, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(radio, channel, handle)| {
                let result = match handle.map(|h| h.join()) {
                    Ok(Ok(result)) => result,
                    Ok(Err(panic)) => Err(TestbedError::Panicked {
                        name: context_name(radio, channel),
                        message: panic_message(panic.as_ref()),
                    }),
                    Err(e) => Err(e),
                };
                if let Err(e) = &result {
                    error!(radio, channel, error = %e, "Scheduler context failed");
                }
                ContextResult {
                    radio,
                    channel,
                    result,
                }
            })
            .collect()
    })
}

fn context_name(radio: usize, channel: usize) -> String {
    format!("tx{}-{}", radio, channel)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn run_context(
    tx: &TxConfig,
    options: &TestbedOptions,
    drivers: &DriverRegistry,
    epoch: MissionEpoch,
    radio: usize,
    channel: usize,
    events: &[TimelineEvent],
) -> TestbedResult<ChannelSummary> {
    let config = &tx.radios[radio];
    let setup = config.setup(radio, RadioRole::Transmit);
    let mut device = drivers.create(&config.device_uri(&options.driver), &setup)?;
    device.configure_channel(channel, &setup.channels[channel])?;
    device.set_time_now()?;

    ChannelScheduler::new(radio, channel, epoch)
        .with_guard_interval(options.guard_interval_s)
        .run(device.as_mut(), events)
}
