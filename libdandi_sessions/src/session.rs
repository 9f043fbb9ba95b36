use std::fmt;
use std::sync::Arc;

use super::error::{SessionError, StoreError};
use super::remote::StoreOpener;
use super::store::NwbStore;
use super::timeseries::{FrameSeries, MultiChannelSeries, SingleChannelSeries, TimeSeries};

const ACQUISITION_GROUP: &str = "acquisition";
const BEHAVIOR_GROUP: &str = "processing/behavior";
const PUPIL_TRACKING_GROUP: &str = "processing/behavior/PupilTracking";
const FLUORESCENCE_GROUP: &str = "processing/ophys/Fluorescence";

const TWO_PHOTON_PREFIX: &str = "TwoPhotonSeries";
const PUPIL_VIDEO_PREFIX: &str = "pupil_video";
const PUPIL_RADIUS_PREFIX: &str = "pupil_radius";
const ROI_RESPONSE_PREFIX: &str = "RoiResponseSeries";

/// The kinds of sub-stream an acquisition may have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubStream {
    TwoPhoton,
    PupilVideo,
    PupilRadius,
    RoiResponse,
}

impl SubStream {
    pub const ALL: [SubStream; 4] = [
        SubStream::TwoPhoton,
        SubStream::PupilVideo,
        SubStream::PupilRadius,
        SubStream::RoiResponse,
    ];

    fn group(&self) -> &'static str {
        match self {
            Self::TwoPhoton => ACQUISITION_GROUP,
            Self::PupilVideo => BEHAVIOR_GROUP,
            Self::PupilRadius => PUPIL_TRACKING_GROUP,
            Self::RoiResponse => FLUORESCENCE_GROUP,
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            Self::TwoPhoton => TWO_PHOTON_PREFIX,
            Self::PupilVideo => PUPIL_VIDEO_PREFIX,
            Self::PupilRadius => PUPIL_RADIUS_PREFIX,
            Self::RoiResponse => ROI_RESPONSE_PREFIX,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::TwoPhoton => "two-photon series",
            Self::PupilVideo => "pupil video",
            Self::PupilRadius => "pupil radius",
            Self::RoiResponse => "ROI response series",
        }
    }

    /// Path of this sub-stream for an acquisition, e.g.
    /// `processing/behavior/PupilTracking/pupil_radius_000`
    pub fn path_for(&self, acquisition_name: &str) -> String {
        format!("{}/{}_{}", self.group(), self.prefix(), acquisition_name)
    }
}

/// Parse `TwoPhotonSeries_<name>` into `<name>`. Anything else (including an empty suffix or
/// a suffix with further underscores) is not an acquisition.
fn parse_acquisition_name(key: &str) -> Option<&str> {
    let mut parts = key.split('_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(TWO_PHOTON_PREFIX), Some(name), None) if !name.is_empty() => Some(name),
        _ => None,
    }
}

/// Which sub-streams exist for one acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionCompleteness {
    pub name: String,
    pub two_photon: bool,
    pub pupil_video: bool,
    pub pupil_radius: bool,
    pub roi_response: bool,
}

impl AcquisitionCompleteness {
    pub fn has(&self, kind: SubStream) -> bool {
        match kind {
            SubStream::TwoPhoton => self.two_photon,
            SubStream::PupilVideo => self.pupil_video,
            SubStream::PupilRadius => self.pupil_radius,
            SubStream::RoiResponse => self.roi_response,
        }
    }

    pub fn is_complete(&self) -> bool {
        SubStream::ALL.iter().all(|kind| self.has(*kind))
    }
}

/// Per-acquisition presence of every sub-stream kind in a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletenessReport {
    pub acquisitions: Vec<AcquisitionCompleteness>,
}

impl CompletenessReport {
    pub fn is_complete(&self) -> bool {
        self.acquisitions.iter().all(|a| a.is_complete())
    }

    /// Names of the acquisitions lacking the given kind
    pub fn missing(&self, kind: SubStream) -> Vec<&str> {
        self.acquisitions
            .iter()
            .filter(|a| !a.has(kind))
            .map(|a| a.name.as_str())
            .collect()
    }
}

/// Timing summary of one sub-stream
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSummary {
    pub kind: SubStream,
    pub starting_time: f64,
    pub rate: f64,
    pub num_samples: usize,
    /// Frame shape for frame series, channel count for response series
    pub extent: Vec<usize>,
}

/// A printable overview of a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub source: String,
    pub num_acquisitions: usize,
    pub num_rois: Option<usize>,
    pub acquisition: Option<String>,
    pub series: Vec<SeriesSummary>,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Source: {}", self.source)?;
        writeln!(f, "Number of acquisitions: {}", self.num_acquisitions)?;
        match self.num_rois {
            Some(n) => writeln!(f, "Number of ROIs: {n}")?,
            None => writeln!(f, "Number of ROIs: unavailable")?,
        }
        if let Some(name) = &self.acquisition {
            writeln!(f, "Acquisition: {name}")?;
        }
        for series in self.series.iter() {
            writeln!(f, "===== {} =====", series.kind.label().to_uppercase())?;
            writeln!(f, "Starting time (sec): {}", series.starting_time)?;
            writeln!(f, "Rate (Hz): {}", series.rate)?;
            writeln!(f, "Number of samples: {}", series.num_samples)?;
            match (series.kind, series.extent.as_slice()) {
                (SubStream::RoiResponse, [channels]) => {
                    writeln!(f, "Number of ROI channels: {channels}")?
                }
                (_, [height, width]) => writeln!(f, "Image size: {height} x {width}")?,
                _ => (),
            }
        }
        Ok(())
    }
}

/// One recording session backed by an opened NWB file.
///
/// The acquisition names are discovered once, from the `TwoPhotonSeries_<name>` entries of the
/// acquisition registry, and never change afterwards. An acquisition name is not a promise
/// that every kind of sub-stream exists for it; lookups of a missing sub-stream fail with
/// [`SessionError::MissingSubStream`] and should be skipped by the caller.
#[derive(Debug)]
pub struct Session {
    source: String,
    store: Arc<dyn NwbStore>,
    acquisition_names: Vec<String>,
}

impl Session {
    /// Open the session at nwb_url using the opener
    pub fn open(nwb_url: &str, opener: &StoreOpener) -> Result<Self, SessionError> {
        let store = opener.open(nwb_url).map_err(SessionError::OpenError)?;
        Self::from_store(nwb_url, store)
    }

    /// Build a session from an already opened store
    pub fn from_store(source: &str, store: Arc<dyn NwbStore>) -> Result<Self, SessionError> {
        let keys = match store.member_names(ACQUISITION_GROUP) {
            Ok(keys) => keys,
            Err(StoreError::NotFound(_)) | Err(StoreError::NotAGroup(_)) => {
                return Err(SessionError::NoAcquisitionRegistry(source.to_string()))
            }
            Err(e) => return Err(SessionError::StoreError(e)),
        };
        let mut acquisition_names: Vec<String> = Vec::new();
        for name in keys.iter().filter_map(|k| parse_acquisition_name(k)) {
            if !acquisition_names.iter().any(|n| n == name) {
                acquisition_names.push(name.to_string());
            }
        }
        log::debug!(
            "Session {source} has {} acquisitions",
            acquisition_names.len()
        );
        Ok(Self {
            source: source.to_string(),
            store,
            acquisition_names,
        })
    }

    pub fn get_source(&self) -> &str {
        &self.source
    }

    /// A copy of the acquisition names, in discovery order
    pub fn get_acquisition_names(&self) -> Vec<String> {
        self.acquisition_names.clone()
    }

    /// Path of a sub-stream, or the expected lookup failure if it does not exist
    fn locate(&self, kind: SubStream, acquisition_name: &str) -> Result<String, SessionError> {
        let path = kind.path_for(acquisition_name);
        if self.store.exists(&path) {
            Ok(path)
        } else {
            Err(SessionError::MissingSubStream {
                kind: kind.label(),
                name: acquisition_name.to_string(),
            })
        }
    }

    pub fn has_sub_stream(&self, kind: SubStream, acquisition_name: &str) -> bool {
        self.store.exists(&kind.path_for(acquisition_name))
    }

    pub fn get_two_photon_series(&self, acquisition_name: &str) -> Result<FrameSeries, SessionError> {
        let path = self.locate(SubStream::TwoPhoton, acquisition_name)?;
        Ok(FrameSeries::new(self.store.clone(), &path)?)
    }

    pub fn get_pupil_video(&self, acquisition_name: &str) -> Result<FrameSeries, SessionError> {
        let path = self.locate(SubStream::PupilVideo, acquisition_name)?;
        Ok(FrameSeries::new(self.store.clone(), &path)?)
    }

    /// Missing for some acquisitions of the reference data; callers skip those
    pub fn get_pupil_radius(
        &self,
        acquisition_name: &str,
    ) -> Result<SingleChannelSeries, SessionError> {
        let path = self.locate(SubStream::PupilRadius, acquisition_name)?;
        Ok(SingleChannelSeries::new(self.store.clone(), &path)?)
    }

    /// Response series of different acquisitions use independent timestamp grids
    pub fn get_roi_response_series(
        &self,
        acquisition_name: &str,
    ) -> Result<MultiChannelSeries, SessionError> {
        let path = self.locate(SubStream::RoiResponse, acquisition_name)?;
        Ok(MultiChannelSeries::new(self.store.clone(), &path)?)
    }

    /// Channel count of the first acquisition's response series.
    ///
    /// Assumes every acquisition has the same ROI count; use [`Session::check_num_rois`] to
    /// verify it.
    pub fn get_num_rois(&self) -> Result<usize, SessionError> {
        let first = self
            .acquisition_names
            .first()
            .ok_or(SessionError::NoAcquisitions)?;
        Ok(self.get_roi_response_series(first)?.num_channels())
    }

    /// ROI count agreed on by every acquisition with a response series
    pub fn check_num_rois(&self) -> Result<usize, SessionError> {
        let mut reference: Option<(String, usize)> = None;
        for name in self.acquisition_names.iter() {
            let count = match self.get_roi_response_series(name) {
                Ok(series) => series.num_channels(),
                Err(e) if e.is_missing() => continue,
                Err(e) => return Err(e),
            };
            match &reference {
                None => reference = Some((name.clone(), count)),
                Some((first_name, first)) if *first != count => {
                    return Err(SessionError::RoiCountMismatch {
                        first_name: first_name.clone(),
                        first: *first,
                        name: name.clone(),
                        found: count,
                    })
                }
                Some(_) => (),
            }
        }
        reference
            .map(|(_, count)| count)
            .ok_or(SessionError::NoAcquisitions)
    }

    pub fn completeness(&self) -> CompletenessReport {
        CompletenessReport {
            acquisitions: self
                .acquisition_names
                .iter()
                .map(|name| AcquisitionCompleteness {
                    name: name.clone(),
                    two_photon: self.has_sub_stream(SubStream::TwoPhoton, name),
                    pupil_video: self.has_sub_stream(SubStream::PupilVideo, name),
                    pupil_radius: self.has_sub_stream(SubStream::PupilRadius, name),
                    roi_response: self.has_sub_stream(SubStream::RoiResponse, name),
                })
                .collect(),
        }
    }

    /// Summarize the session using one acquisition (the first if None). Sub-streams missing
    /// for that acquisition are left out.
    pub fn describe(&self, acquisition_name: Option<&str>) -> SessionSummary {
        let acquisition = acquisition_name
            .map(String::from)
            .or_else(|| self.acquisition_names.first().cloned());
        let mut series = Vec::new();
        if let Some(name) = acquisition.as_deref() {
            if let Ok(s) = self.get_two_photon_series(name) {
                series.push(frame_summary(SubStream::TwoPhoton, &s));
            }
            if let Ok(s) = self.get_pupil_video(name) {
                series.push(frame_summary(SubStream::PupilVideo, &s));
            }
            if let Ok(s) = self.get_pupil_radius(name) {
                series.push(SeriesSummary {
                    kind: SubStream::PupilRadius,
                    starting_time: s.starting_time(),
                    rate: s.rate(),
                    num_samples: s.num_samples(),
                    extent: Vec::new(),
                });
            }
            if let Ok(s) = self.get_roi_response_series(name) {
                series.push(SeriesSummary {
                    kind: SubStream::RoiResponse,
                    starting_time: s.starting_time(),
                    rate: s.rate(),
                    num_samples: s.num_samples(),
                    extent: vec![s.num_channels()],
                });
            }
        }
        SessionSummary {
            source: self.source.clone(),
            num_acquisitions: self.acquisition_names.len(),
            num_rois: self.get_num_rois().ok(),
            acquisition,
            series,
        }
    }
}

fn frame_summary(kind: SubStream, series: &FrameSeries) -> SeriesSummary {
    let (height, width) = series.frame_shape();
    SeriesSummary {
        kind,
        starting_time: series.starting_time(),
        rate: series.rate(),
        num_samples: series.num_frames(),
        extent: vec![height, width],
    }
}
