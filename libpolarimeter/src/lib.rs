//! # polarimeter
//!
//! polarimeter is the online acquisition and analysis for a beam polarimeter, written in
//! Rust. It reads waveforms from a CAEN-style digitizer, extracts the timing and the pulse
//! shape of every detector pulse, and periodically turns them into detector yields and the
//! directional asymmetry which monitors the polarization of the beam.
//!
//! ## Installation
//!
//! The only method of install is from source. If you have not used Rust before, see the
//! [Rust docs](https://www.rust-lang.org/tools/install) to install the tool chain.
//!
//! To build and install the CLI use `cargo install --path ./polarimeter_cli` from the top
//! level of the repository. To use the CLI see the `polarimeter_cli` README.
//!
//! ## Detectors
//!
//! The digitizer reads exactly four channels:
//!
//! - in-plane: the detector in the scattering plane
//! - out-plane 1 and out-plane 2: the detectors perpendicular to it
//! - beam: the beam reference pulse, used as the time zero of every hit
//!
//! Only the three detector channels self-trigger the board. Every trigger produces one hit
//! holding the waveforms of all four channels.
//!
//! ## Pipeline
//!
//! A run uses three threads. The producer pulls hits from the
//! [`HardwareSession`](session::HardwareSession) into a bounded
//! [`HitQueue`](hit_queue::HitQueue). The consumer drains the queue, extracts the constant
//! fraction time and the short/long gate charges of each detector pulse, and fills a PS vs
//! TOF histogram per detector. The timer integrates the histograms every interval, logs the
//! yields and asymmetries, and publishes them. Histograms accumulate over the whole run.
//!
//! ## Configuration
//!
//! The configuration is a YAML file. A template can be generated with
//! `polarimeter_cli -p config.yml new`. The format is as follows:
//!
//! ```yml
//! connection:
//!   kind: simulated
//! acquisition:
//!   dc_offset: 0.2
//!   threshold: 500
//!   cfd_threshold: 50
//!   in_channel: 0
//!   out_channel_1: 1
//!   out_channel_2: 2
//!   beam_channel: 3
//!   short_gate: 30
//!   long_gate: 300
//!   record_length: 256
//!   block_event_count: 1024
//!   trigger_polarity: falling
//!   post_trigger_size_percent: 80
//! analysis:
//!   beam_threshold: 500
//!   time_offsets: [0.0, 11.18, 11.18]
//!   binning:
//!     tof_bins: 1000
//!     tof_min: 0.0
//!     tof_max: 100.0
//!     ps_bins: 1000
//!     ps_min: 0.0
//!     ps_max: 1.0
//!   roi:
//!     tof_min: 0.0
//!     tof_max: 100.0
//!     ps_min: 0.0
//!     ps_max: 1.0
//! pipeline:
//!   interval_secs: 10
//!   queue_capacity: 65536
//!   overflow_policy:
//!     kind: drop_oldest
//!   poll_delay_ms: 1
//!   comm_retry_delay_ms: 10
//! results_path: null
//! ```
//!
//! The `connection` can also be `replay` (with a `trace_path`) to loop over a recorded
//! trace file, or `usb`/`optical_link` for hardware, which requires a linked driver.
//! Gates, record length and the TOF axis are in samples. The `analysis`, `pipeline`
//! and `results_path` sections are optional.
//!
//! ## Output
//!
//! If `results_path` is set, every aggregation appends one JSON line:
//!
//! ```json
//! {"inYield":"1520","out1Yield":"1388","out2Yield":"1402","renderedHistogramsBlob":"[...]","timestamp":"1760700000"}
//! ```
//!
//! Every value is a string. The blob holds the three histograms in sparse form,
//! `(tof bin, ps bin, count)` for every non-empty bin.
pub mod asymmetry;
pub mod beam_signal;
pub mod board;
pub mod channel_roles;
pub mod config;
pub mod constants;
pub mod decode;
pub mod driver;
pub mod error;
pub mod histogram;
pub mod hit;
pub mod hit_queue;
pub mod pipeline;
pub mod processor;
pub mod replay;
pub mod results;
pub mod session;
pub mod settings;
pub mod signal;
pub mod simulator;
pub mod status;
pub mod timestamp;
pub mod trace_file;
