use crate::devices::{
    hardware::light_bank::{LampSwitch, LightBank, SysfsGpio},
    software::interval::IntervalTimer,
};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use strum_macros::IntoStaticStr;
use tracing::{info, warn};
use uuid::Uuid;

/// How often the controller polls the sequence between phase changes.
/// The phases run for tens of seconds, so a coarse poll is plenty.
const SEQUENCE_POLL_MS: u64 = 25;

/// Configuration for the stage illumination component. The durations
/// mirror the capture schedule: one full pass of the sequence covers
/// two capture intervals, so each still lands inside the matching
/// illumination window.
#[derive(Deserialize, Serialize, PartialEq, Eq, Debug)]
pub struct StageIlluminationConfig {
    /// Id of the microscope rig the component is attached to.
    microscope_id: u8,
    /// Config file used to set up the lamp bank in the component.
    light_bank_config_file: PathBuf,
    /// Delay before the first pass of the sequence begins.
    initial_hold_ms: u64,
    /// Time both lamps stay dark before the next lamp lights.
    dark_interval_ms: u64,
    /// Time a lamp stays lit once switched on.
    lit_interval_ms: u64,
    /// Time both lamps are held on at startup while the operator
    /// mounts the specimen.
    mounting_hold_ms: u64,
}

impl StageIlluminationConfig {
    /// Stage illumination configuration with the deployed rig timings.
    ///
    /// * `microscope_id`: rig ids from [0 - 2]
    /// * `light_bank_config_file`: path to the lamp bank device config.
    pub fn new<F: AsRef<OsStr>>(microscope_id: u8, light_bank_config_file: F) -> Self {
        Self {
            microscope_id,
            light_bank_config_file: (&light_bank_config_file).into(),
            initial_hold_ms: 10_000,
            dark_interval_ms: 130_000,
            lit_interval_ms: 20_000,
            mounting_hold_ms: 180_000,
        }
    }

    /// Build the config by reading a file, this is a helper function.
    ///
    /// * `filepath`: path to config.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Self {
        let file = Path::new(&filepath);
        if file.is_file() {
            let config_file = config::Config::builder()
                .add_source(config::File::new(
                    &file.to_string_lossy(),
                    config::FileFormat::Yaml,
                ))
                .build()
                .expect("Failed read config");

            config_file
                .try_deserialize::<StageIlluminationConfig>()
                .expect("Failed to parse config file into struct")
        } else {
            panic!("Could not locate the config file {:?}", file);
        }
    }

    /// Per-phase durations for the sequence.
    pub fn timings(&self) -> SequenceTimings {
        SequenceTimings {
            initial_hold: Duration::from_millis(self.initial_hold_ms),
            dark_interval: Duration::from_millis(self.dark_interval_ms),
            lit_interval: Duration::from_millis(self.lit_interval_ms),
        }
    }
}

/// Phases of the illumination sequence. The pending phases wait with
/// both lamps dark; the lit phases hold one lamp on for the capture
/// window. After the one-off initial hold the sequence cycles forever.
#[derive(IntoStaticStr, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencePhase {
    /// One-off delay before the first pass.
    InitialHold,
    /// Dark wait before the brightfield lamp lights.
    BrightfieldPending,
    /// Brightfield lamp is lit.
    BrightfieldLit,
    /// Dark wait before the darkfield ring lights.
    DarkfieldPending,
    /// Darkfield ring is lit.
    DarkfieldLit,
}

/// Fixed per-phase durations for the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceTimings {
    /// Duration of [`SequencePhase::InitialHold`].
    pub initial_hold: Duration,
    /// Duration of the pending (dark) phases.
    pub dark_interval: Duration,
    /// Duration of the lit phases.
    pub lit_interval: Duration,
}

/// One observed phase change, carrying the single lamp action the
/// transition performs. Leaving the initial hold performs none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseChange {
    /// Phase the sequence left.
    pub from: SequencePhase,
    /// Phase the sequence entered.
    pub to: SequencePhase,
    /// Lamp action to perform on this transition.
    pub switch: Option<LampSwitch>,
}

/// The timed state machine that walks the lamp bank through the fixed
/// brightfield/darkfield cycle. Holds no lamp state itself; each poll
/// either reports nothing or exactly one phase change for the caller
/// to act on.
pub struct IlluminationSequence {
    /// Current phase.
    phase: SequencePhase,
    /// Per-phase durations.
    timings: SequenceTimings,
    /// Start-of-phase book-keeping.
    timer: IntervalTimer,
}

impl IlluminationSequence {
    /// Create a sequence parked in the initial hold.
    pub fn new(timings: SequenceTimings) -> Self {
        Self {
            phase: SequencePhase::InitialHold,
            timings,
            timer: IntervalTimer::start_now(),
        }
    }

    /// Current phase of the sequence.
    pub fn phase(&self) -> SequencePhase {
        self.phase
    }

    /// Park the sequence back in the initial hold with a fresh phase
    /// timer. Called once the startup lamp drive has finished.
    pub fn restart(&mut self) {
        self.restart_at(Instant::now());
    }

    /// Clock-injected variant of [`IlluminationSequence::restart`].
    pub fn restart_at(&mut self, now: Instant) {
        self.phase = SequencePhase::InitialHold;
        self.timer.restart_at(now);
    }

    /// Advance the sequence if the current phase has run its duration.
    pub fn poll(&mut self) -> Option<PhaseChange> {
        self.poll_at(Instant::now())
    }

    /// Clock-injected variant of [`IlluminationSequence::poll`]. The
    /// phase timer resets inside the elapsed check, so a transition
    /// needs no extra book-keeping here.
    pub fn poll_at(&mut self, now: Instant) -> Option<PhaseChange> {
        if !self.timer.period_elapsed_at(now, self.phase_duration()) {
            return None;
        }

        let from = self.phase;
        let (to, switch) = match from {
            SequencePhase::InitialHold => (SequencePhase::BrightfieldPending, None),
            SequencePhase::BrightfieldPending => (
                SequencePhase::BrightfieldLit,
                Some(LampSwitch::BrightfieldOn),
            ),
            SequencePhase::BrightfieldLit => (
                SequencePhase::DarkfieldPending,
                Some(LampSwitch::BrightfieldOff),
            ),
            SequencePhase::DarkfieldPending => {
                (SequencePhase::DarkfieldLit, Some(LampSwitch::DarkfieldOn))
            }
            SequencePhase::DarkfieldLit => (
                SequencePhase::BrightfieldPending,
                Some(LampSwitch::DarkfieldOff),
            ),
        };
        self.phase = to;
        Some(PhaseChange { from, to, switch })
    }

    fn phase_duration(&self) -> Duration {
        match self.phase {
            SequencePhase::InitialHold => self.timings.initial_hold,
            SequencePhase::BrightfieldPending | SequencePhase::DarkfieldPending => {
                self.timings.dark_interval
            }
            SequencePhase::BrightfieldLit | SequencePhase::DarkfieldLit => {
                self.timings.lit_interval
            }
        }
    }
}

/// Component that houses the lamp bank and the sequence that drives it
/// for one microscope rig.
#[allow(dead_code)]
pub struct StageIllumination {
    /// Unique id of the component.
    uuid: Uuid,
    /// Microscope rig id the component is tied to.
    microscope_id: u8,
    /// Startup hold while the operator mounts the specimen.
    mounting_hold: Duration,
    /// The lamp bank this component manages.
    light_bank: LightBank<SysfsGpio>,
    /// The timed sequence.
    sequence: IlluminationSequence,
}

impl StageIllumination {
    /// Generate a new component by consuming a config.
    ///
    /// * `config`: `StageIlluminationConfig`
    pub fn new(config: StageIlluminationConfig) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            microscope_id: config.microscope_id,
            mounting_hold: Duration::from_millis(config.mounting_hold_ms),
            light_bank: LightBank::from_config_file(&config.light_bank_config_file),
            sequence: IlluminationSequence::new(config.timings()),
        }
    }

    /// Generate a new component by consuming the config stored
    /// in a file.
    ///
    /// * `filepath`: filepath to a config.
    pub fn from_config_file<F: AsRef<OsStr>>(filepath: F) -> Self {
        let config = StageIlluminationConfig::from_file(filepath);
        Self::new(config)
    }
}

/// Unit struct for controlling the illumination component.
pub struct StageIlluminationController;

impl StageIlluminationController {
    /// Start the component. Runs the one-off startup drive, then polls
    /// the sequence forever; the loop never exits.
    ///
    /// * `stage`: consumed component.
    pub async fn start(mut stage: StageIllumination) {
        Self::run_mounting_sequence(&mut stage).await;

        stage.sequence.restart();
        info!(
            "entering illumination cycle on microscope {}",
            stage.microscope_id
        );

        loop {
            if let Some(change) = stage.sequence.poll() {
                info!(
                    "phase changed from {} to {}",
                    <&str>::from(change.from),
                    <&str>::from(change.to)
                );
                if let Some(switch) = change.switch {
                    // A failed relay write is skipped; the next pass of
                    // the cycle will drive the line again.
                    if let Err(e) = stage.light_bank.apply(switch) {
                        warn!("lamp switch {} failed: {e}", <&str>::from(switch));
                    }
                    if switch == LampSwitch::DarkfieldOff {
                        info!("one illumination pass finished");
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(SEQUENCE_POLL_MS)).await;
        }
    }

    /// One-off startup drive: everything dark, then both lamps held on
    /// while the operator positions the specimen, then a three stage
    /// countdown blink on the indicator telling the operator the camera
    /// system has to be running before the last blinks finish.
    async fn run_mounting_sequence(stage: &mut StageIllumination) {
        info!("lamps off");
        stage
            .light_bank
            .all_lamps_off()
            .expect("Failed to drive lamp bank");
        tokio::time::sleep(Duration::from_secs(1)).await;

        info!(
            "lamps on for specimen mounting, holding {:?}",
            stage.mounting_hold
        );
        stage
            .light_bank
            .all_lamps_on()
            .expect("Failed to drive lamp bank");
        tokio::time::sleep(stage.mounting_hold).await;

        stage
            .light_bank
            .apply(LampSwitch::BrightfieldOff)
            .expect("Failed to drive lamp bank");
        stage
            .light_bank
            .apply(LampSwitch::DarkfieldOff)
            .expect("Failed to drive lamp bank");

        // Mounting has to be finished by the end of the slow blinks,
        // the camera running two or three seconds after the fast ones.
        info!("countdown blink: mounting");
        Self::blink_indicator(stage, 3, 1000, 3000).await;
        info!("countdown blink: camera warm up");
        Self::blink_indicator(stage, 10, 1000, 1000).await;
        info!("countdown blink: camera start");
        Self::blink_indicator(stage, 10, 500, 500).await;
    }

    async fn blink_indicator(stage: &mut StageIllumination, count: u32, off_ms: u64, on_ms: u64) {
        for _ in 0..count {
            stage
                .light_bank
                .set_indicator(false)
                .expect("Failed to drive indicator lamp");
            tokio::time::sleep(Duration::from_millis(off_ms)).await;
            stage
                .light_bank
                .set_indicator(true)
                .expect("Failed to drive indicator lamp");
            tokio::time::sleep(Duration::from_millis(on_ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs::OpenOptions;

    fn test_timings() -> SequenceTimings {
        SequenceTimings {
            initial_hold: Duration::from_millis(10),
            dark_interval: Duration::from_millis(130),
            lit_interval: Duration::from_millis(20),
        }
    }

    /// Walk the sequence with a synthetic clock, returning every phase
    /// change observed over `steps` polls spaced `step` apart.
    fn walk(seq: &mut IlluminationSequence, t0: Instant, step: Duration, steps: u32) -> Vec<PhaseChange> {
        let mut changes = Vec::new();
        for i in 1..=steps {
            if let Some(change) = seq.poll_at(t0 + step * i) {
                changes.push(change);
            }
        }
        changes
    }

    #[test]
    fn test_phases_cycle_in_fixed_order() {
        let t0 = Instant::now();
        let mut seq = IlluminationSequence::new(test_timings());
        seq.restart_at(t0);

        // 10ms polls across two full passes plus the initial hold.
        let changes = walk(&mut seq, t0, Duration::from_millis(10), 60);

        let phases: Vec<SequencePhase> = changes.iter().map(|c| c.to).collect();
        assert_eq!(
            phases,
            vec![
                SequencePhase::BrightfieldPending,
                SequencePhase::BrightfieldLit,
                SequencePhase::DarkfieldPending,
                SequencePhase::DarkfieldLit,
                SequencePhase::BrightfieldPending,
                SequencePhase::BrightfieldLit,
                SequencePhase::DarkfieldPending,
                SequencePhase::DarkfieldLit,
            ],
            "Sequence left the fixed cyclic order"
        );
        assert!(
            changes.iter().skip(1).all(|c| c.from != SequencePhase::InitialHold),
            "Initial hold must happen exactly once"
        );
    }

    #[test]
    fn test_each_transition_performs_one_lamp_action() {
        let t0 = Instant::now();
        let mut seq = IlluminationSequence::new(test_timings());
        seq.restart_at(t0);

        let changes = walk(&mut seq, t0, Duration::from_millis(10), 33);

        let switches: Vec<Option<LampSwitch>> = changes.iter().map(|c| c.switch).collect();
        assert_eq!(
            switches,
            vec![
                None,
                Some(LampSwitch::BrightfieldOn),
                Some(LampSwitch::BrightfieldOff),
                Some(LampSwitch::DarkfieldOn),
                Some(LampSwitch::DarkfieldOff),
            ]
        );
    }

    #[test]
    fn test_no_change_before_phase_duration() {
        let t0 = Instant::now();
        let mut seq = IlluminationSequence::new(test_timings());
        seq.restart_at(t0);

        assert_eq!(seq.poll_at(t0 + Duration::from_millis(9)), None);
        assert_eq!(seq.phase(), SequencePhase::InitialHold);

        let change = seq.poll_at(t0 + Duration::from_millis(10)).unwrap();
        assert_eq!(change.to, SequencePhase::BrightfieldPending);
        // The dark interval is measured from the transition, not from t0.
        assert_eq!(seq.poll_at(t0 + Duration::from_millis(139)), None);
        assert!(seq.poll_at(t0 + Duration::from_millis(140)).is_some());
    }

    #[test]
    #[serial]
    fn test_write_component_config_to_file() {
        let config =
            StageIlluminationConfig::new(0, "./config/devices/microscope/light_bank.yaml");

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(Path::new(&format!(
                "{}/config/components/microscope/actuating/stage_illumination.yaml",
                env!("CARGO_MANIFEST_DIR")
            )))
            .expect("Faile to open file");
        serde_yaml::to_writer(file, &config).expect("Failed to write yaml");

        let read_config = StageIlluminationConfig::from_file(Path::new(&format!(
            "{}/config/components/microscope/actuating/stage_illumination.yaml",
            env!("CARGO_MANIFEST_DIR")
        )));
        assert_eq!(
            config, read_config,
            "Failed to read write illumination config"
        );
    }
}
