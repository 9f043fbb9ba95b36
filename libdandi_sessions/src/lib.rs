//! # dandi_sessions
//!
//! dandi_sessions is a reader and batch reporter for the multi-acquisition two-photon
//! imaging sessions of DANDI dandiset 001256, written in Rust. It opens the NWB files of the
//! dandiset (either through a pre-built LINDI JSON index or as a downloaded HDF5 file),
//! exposes each session as a set of named acquisitions with their imaging, pupil tracking,
//! and ROI response series, and writes a diagnostics report for every session in the
//! dandiset.
//!
//! ## Installation
//!
//! Currently the only method of install is from source, which is laid out below.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### HDF5
//!
//! Before building and running dandi_sessions, HDF5 must be installed. Typically this will
//! be installed using a package manager (homebrew, apt, etc), and the Rust libraries will
//! auto detect the location of the HDF install. If a newer version had to be installed to a
//! custom location, write the following snippet into the file `.cargo/config.toml` in the
//! dandi_sessions repository:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./dandi_sessions_cli` from the top
//! level repository.
//!
//! ## Sessions
//!
//! A [`session::Session`] is opened from an NWB URL (or a local path). The acquisition names
//! are discovered once from the `TwoPhotonSeries_<name>` entries of the `acquisition` group.
//! For every acquisition name the session can look up
//!
//! - the two-photon series `acquisition/TwoPhotonSeries_<name>`
//! - the pupil video `processing/behavior/pupil_video_<name>`
//! - the pupil radius `processing/behavior/PupilTracking/pupil_radius_<name>`
//! - the ROI responses `processing/ophys/Fluorescence/RoiResponseSeries_<name>`
//!
//! Not every acquisition has every sub-stream (pupil radius is missing for some); a missing
//! sub-stream is a [`error::SessionError::MissingSubStream`] which aggregations skip.
//! Every series is regularly sampled, and its timestamps are derived as
//! `starting_time + i / rate`. Series of different acquisitions do not share a clock zero, so
//! they are compared on their rebased timestamps (`timestamps - starting_time`).
//!
//! Sessions should be loaded through [`session_cache::load_session`], which memoizes them by
//! URL for the life of the process.
//!
//! ## Configuration
//!
//! The report is configured with a YAML file. The CLI can write a template using the `new`
//! subcommand. The format is as follows:
//!
//! ```yml
//! dandiset_id: '001256'
//! dandiset_version: 0.241120.2150
//! staging: false
//! output_path: ./report_output
//! cache_path: ./nwb_cache
//! use_lindi: true
//! frame_index: 10
//! roi_number: 28
//! max_sessions: null
//! ```
//!
//! - `use_lindi`: read sessions through their LINDI index when one is published. Otherwise
//! (or when no index exists) the raw NWB file is downloaded into `cache_path`.
//! - `frame_index`: the frame shown for the pupil video and two-photon products
//! - `roi_number`: the ROI (1-based) averaged across acquisitions
//! - `max_sessions`: only report the first N sessions of the dandiset, or all if null
//!
//! ## Output
//!
//! The report writes a Markdown index and one HDF5 diagnostics file per session:
//!
//! ```text
//! report_output
//! |---- index.md
//! |---- sessions
//! |    |---- <session_id>
//! |    |    |---- diagnostics.h5
//! ```
//!
//! The diagnostics file holds one group per product:
//!
//! ```text
//! diagnostics.h5 - session_id, source, version
//! |---- pupil_video_frame - title, acquisition, frame_index, included, skipped
//! |    |---- data(dset)
//! |---- two_photon_frame - title, acquisition, frame_index, included, skipped
//! |    |---- data(dset)
//! |---- average_pupil_response - title, included, skipped
//! |    |---- time(dset)
//! |    |---- data(dset)
//! |---- pupil_radius_aligned - title, included, skipped
//! |    |---- <acquisition>
//! |    |    |---- time(dset)
//! |    |    |---- data(dset)
//! |---- roi_responses_first_acquisition - title, acquisition, included, skipped
//! |    |---- time(dset)
//! |    |---- data(dset)
//! |---- average_roi_response - title, included, skipped
//! |    |---- time(dset)
//! |    |---- data(dset)
//! |---- pupil_radius_early_late - title, included, skipped
//! |    |---- x(dset)
//! |    |---- y(dset)
//! |---- roi_activation_versus_pupil - title, included, skipped
//! |    |---- x(dset)
//! |    |---- y(dset)
//! ```
//!
//! The scatter products hold one point per included acquisition, in the order of the
//! `included` attribute.
pub mod analysis;
pub mod catalog;
pub mod config;
pub mod error;
pub mod hdf_store;
pub mod lindi_store;
pub mod process;
pub mod remote;
pub mod report;
pub mod session;
pub mod session_cache;
pub mod store;
pub mod timeseries;
