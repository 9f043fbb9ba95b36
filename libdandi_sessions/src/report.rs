use hdf5::types::VarLenUnicode;
use hdf5::File;
use ndarray::{Array1, Array2};
use std::fmt::Write as FmtWrite;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::analysis::{
    pupil_radius_mean, pupil_radius_scatter, roi_mean, roi_pupil_scatter, MeanResponse, Scatter,
};
use super::catalog::SessionDescriptor;
use super::config::Config;
use super::error::{AnalysisError, ReportError, SessionError};
use super::session::{CompletenessReport, Session, SubStream};
use super::timeseries::TimeSeries;

const TIME_NAME: &str = "time";
const DATA_NAME: &str = "data";
const X_NAME: &str = "x";
const Y_NAME: &str = "y";
/// Rebased sample times (seconds) of the scatter products
const EARLY_PUPIL_TIME: f64 = 2.0;
const LATE_PUPIL_TIME: f64 = 5.0;
const ROI_ACTIVATION_TIME: f64 = 4.2;
/// Acquisition used for single frame products when the session has it
const PREFERRED_ACQUISITION: &str = "000";

/// This is the version of the diagnostics format
pub const FORMAT_VERSION: &str = "1.0";

/// The numeric content of one report product
#[derive(Debug, Clone, PartialEq)]
pub enum ProductData {
    /// A single image
    Frame(Array2<f64>),
    /// One trace on a rebased time axis
    Trace { time: Array1<f64>, data: Array1<f64> },
    /// One trace per acquisition, each on its own rebased time axis
    Traces(Vec<(String, Array1<f64>, Array1<f64>)>),
    /// Several channels sharing a rebased time axis, (samples x channels)
    Channels { time: Array1<f64>, data: Array2<f64> },
    /// One (x, y) point per acquisition
    Points(Vec<(String, f64, f64)>),
}

/// One diagnostic product of a session
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub name: &'static str,
    pub title: &'static str,
    /// Acquisition the product was taken from, if it comes from a single one
    pub acquisition: Option<String>,
    pub data: ProductData,
    pub included: Vec<String>,
    pub skipped: Vec<String>,
}

impl Product {
    fn single(
        name: &'static str,
        title: &'static str,
        acquisition: &str,
        data: ProductData,
    ) -> Self {
        Self {
            name,
            title,
            acquisition: Some(acquisition.to_string()),
            data,
            included: vec![acquisition.to_string()],
            skipped: Vec::new(),
        }
    }

    fn aggregate(name: &'static str, title: &'static str, mean: MeanResponse) -> Self {
        Self {
            name,
            title,
            acquisition: None,
            data: ProductData::Trace {
                time: mean.time,
                data: mean.mean,
            },
            included: mean.included,
            skipped: mean.skipped,
        }
    }

    fn points(name: &'static str, title: &'static str, scatter: Scatter) -> Self {
        Self {
            name,
            title,
            acquisition: None,
            included: scatter.points.iter().map(|(n, _, _)| n.clone()).collect(),
            skipped: scatter.skipped,
            data: ProductData::Points(scatter.points),
        }
    }
}

/// The acquisition single frame products are taken from
fn frame_acquisition(session: &Session) -> Result<String, AnalysisError> {
    let names = session.get_acquisition_names();
    if names.iter().any(|n| n == PREFERRED_ACQUISITION) {
        return Ok(String::from(PREFERRED_ACQUISITION));
    }
    names
        .into_iter()
        .next()
        .ok_or(AnalysisError::SessionError(SessionError::NoAcquisitions))
}

fn pupil_video_frame(session: &Session, frame_index: usize) -> Result<Product, AnalysisError> {
    let acquisition = frame_acquisition(session)?;
    let frame = session
        .get_pupil_video(&acquisition)?
        .get_frame(frame_index)
        .map_err(SessionError::from)?;
    Ok(Product::single(
        "pupil_video_frame",
        "Pupil Video Frame",
        &acquisition,
        ProductData::Frame(frame),
    ))
}

fn two_photon_frame(session: &Session, frame_index: usize) -> Result<Product, AnalysisError> {
    let acquisition = frame_acquisition(session)?;
    let frame = session
        .get_two_photon_series(&acquisition)?
        .get_frame(frame_index)
        .map_err(SessionError::from)?;
    Ok(Product::single(
        "two_photon_frame",
        "Two-photon Video Frame",
        &acquisition,
        ProductData::Frame(frame),
    ))
}

fn average_pupil_response(session: &Session) -> Result<Product, AnalysisError> {
    Ok(Product::aggregate(
        "average_pupil_response",
        "Average Pupil Response",
        pupil_radius_mean(session)?,
    ))
}

fn pupil_radius_aligned(session: &Session) -> Result<Product, AnalysisError> {
    let mut traces = Vec::new();
    let mut skipped = Vec::new();
    for name in session.get_acquisition_names() {
        let trace = session.get_pupil_radius(&name).and_then(|series| {
            let data = series.get_data()?;
            Ok((series.get_rebased_timestamps(), data))
        });
        match trace {
            Ok((time, data)) => traces.push((name, time, data)),
            Err(e) => {
                log::debug!("No aligned pupil radius for acquisition {name}: {e}");
                skipped.push(name);
            }
        }
    }
    if traces.is_empty() {
        return Err(AnalysisError::NoData);
    }
    Ok(Product {
        name: "pupil_radius_aligned",
        title: "Pupil Radius Aligned to Start Time",
        acquisition: None,
        included: traces.iter().map(|(name, _, _)| name.clone()).collect(),
        skipped,
        data: ProductData::Traces(traces),
    })
}

fn roi_responses_first_acquisition(session: &Session) -> Result<Product, AnalysisError> {
    let names = session.get_acquisition_names();
    let first = names
        .first()
        .ok_or(AnalysisError::SessionError(SessionError::NoAcquisitions))?;
    let series = session.get_roi_response_series(first)?;
    let data = series.get_data().map_err(SessionError::from)?;
    Ok(Product::single(
        "roi_responses_first_acquisition",
        "ROI Responses First Acquisition",
        first,
        ProductData::Channels {
            time: series.get_rebased_timestamps(),
            data,
        },
    ))
}

fn average_roi_response(session: &Session, roi_number: usize) -> Result<Product, AnalysisError> {
    Ok(Product::aggregate(
        "average_roi_response",
        "Average ROI Response",
        roi_mean(session, roi_number)?,
    ))
}

fn pupil_radius_early_late(session: &Session) -> Result<Product, AnalysisError> {
    Ok(Product::points(
        "pupil_radius_early_late",
        "Pupil Radius at 5 s versus 2 s",
        pupil_radius_scatter(session, EARLY_PUPIL_TIME, LATE_PUPIL_TIME)?,
    ))
}

fn roi_activation_versus_pupil(
    session: &Session,
    roi_number: usize,
) -> Result<Product, AnalysisError> {
    Ok(Product::points(
        "roi_activation_versus_pupil",
        "ROI Activation at 4.2 s versus Pupil Radius at 2 s",
        roi_pupil_scatter(session, roi_number, ROI_ACTIVATION_TIME, EARLY_PUPIL_TIME)?,
    ))
}

/// Everything the report knows about one session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub session_id: String,
    pub asset_path: String,
    pub source: String,
    pub num_acquisitions: usize,
    pub num_rois: Option<usize>,
    /// Set when the acquisitions disagree on their ROI count
    pub roi_warning: Option<String>,
    pub completeness: CompletenessReport,
    pub products: Vec<Product>,
    /// (product name, error) for every product that could not be made
    pub product_errors: Vec<(String, String)>,
    /// Set when the session itself could not be loaded
    pub failure: Option<String>,
}

impl SessionReport {
    /// Compute every product of a loaded session. A failing product is logged and left out.
    pub fn build(descriptor: &SessionDescriptor, session: &Session, config: &Config) -> Self {
        let id = &descriptor.session_id;
        let attempts = [
            ("pupil_video_frame", pupil_video_frame(session, config.frame_index)),
            ("two_photon_frame", two_photon_frame(session, config.frame_index)),
            ("average_pupil_response", average_pupil_response(session)),
            ("pupil_radius_aligned", pupil_radius_aligned(session)),
            (
                "roi_responses_first_acquisition",
                roi_responses_first_acquisition(session),
            ),
            (
                "average_roi_response",
                average_roi_response(session, config.roi_number),
            ),
            ("pupil_radius_early_late", pupil_radius_early_late(session)),
            (
                "roi_activation_versus_pupil",
                roi_activation_versus_pupil(session, config.roi_number),
            ),
        ];

        let mut products = Vec::new();
        let mut product_errors = Vec::new();
        for (name, attempt) in attempts {
            match attempt {
                Ok(product) => products.push(product),
                Err(e) => {
                    log::warn!("Session {id}: could not make {name}: {e}");
                    product_errors.push((name.to_string(), e.to_string()));
                }
            }
        }

        let roi_warning = match session.check_num_rois() {
            Err(e @ SessionError::RoiCountMismatch { .. }) => {
                log::warn!("Session {id}: {e}");
                Some(e.to_string())
            }
            _ => None,
        };

        Self {
            session_id: id.clone(),
            asset_path: descriptor.asset_path.clone(),
            source: session.get_source().to_string(),
            num_acquisitions: session.get_acquisition_names().len(),
            num_rois: session.get_num_rois().ok(),
            roi_warning,
            completeness: session.completeness(),
            products,
            product_errors,
            failure: None,
        }
    }

    /// A session that could not be loaded
    pub fn failed(descriptor: &SessionDescriptor, error: &SessionError) -> Self {
        Self {
            session_id: descriptor.session_id.clone(),
            asset_path: descriptor.asset_path.clone(),
            source: descriptor.asset_url.clone(),
            num_acquisitions: 0,
            num_rois: None,
            roi_warning: None,
            completeness: CompletenessReport::default(),
            products: Vec::new(),
            product_errors: Vec::new(),
            failure: Some(error.to_string()),
        }
    }
}

fn unicode(value: &str) -> Result<VarLenUnicode, ReportError> {
    VarLenUnicode::from_str(value).map_err(|e| ReportError::StringError(e.to_string()))
}

fn write_string_attr(
    location: &hdf5::Location,
    name: &str,
    value: &str,
) -> Result<(), ReportError> {
    location
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&unicode(value)?)?;
    Ok(())
}

fn write_trace(
    group: &hdf5::Group,
    time: &Array1<f64>,
    data: &Array1<f64>,
) -> Result<(), ReportError> {
    group.new_dataset_builder().with_data(time).create(TIME_NAME)?;
    group.new_dataset_builder().with_data(data).create(DATA_NAME)?;
    Ok(())
}

/// Writes the products of one session to an HDF5 file.
///
/// Frames are stored as a `data` dataset. Traces are stored as `time` and `data` datasets,
/// with one sub-group per acquisition when each trace has its own time axis.
#[derive(Debug)]
pub struct DiagnosticsWriter {
    file_handle: File,
    path: PathBuf,
}
// Structure
// diagnostics.h5 - session_id, source, version
// |---- pupil_video_frame - title, acquisition, frame_index, included, skipped
// |    |---- data(dset)
// |---- average_pupil_response - title, included, skipped
// |    |---- time(dset)
// |    |---- data(dset)
// |---- pupil_radius_aligned - title, included, skipped
// |    |---- <acquisition>
// |    |    |---- time(dset)
// |    |    |---- data(dset)
// |---- roi_responses_first_acquisition - title, acquisition, included, skipped
// |    |---- time(dset)
// |    |---- data(dset, samples x rois)
// |---- pupil_radius_early_late - title, included, skipped
// |    |---- x(dset)
// |    |---- y(dset)

impl DiagnosticsWriter {
    /// Create the writer, creating the file (and its directory) at path
    pub fn new(path: &Path, report: &SessionReport) -> Result<Self, ReportError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file_handle = File::create(path)?;
        let version = format!("{}:{}", env!("CARGO_PKG_NAME"), FORMAT_VERSION);
        write_string_attr(&file_handle, "session_id", &report.session_id)?;
        write_string_attr(&file_handle, "source", &report.source)?;
        write_string_attr(&file_handle, "version", &version)?;
        Ok(Self {
            file_handle,
            path: path.to_path_buf(),
        })
    }

    pub fn write_product(&self, product: &Product, frame_index: usize) -> Result<(), ReportError> {
        let group = self.file_handle.create_group(product.name)?;
        write_string_attr(&group, "title", product.title)?;
        write_string_attr(&group, "included", &product.included.join(","))?;
        write_string_attr(&group, "skipped", &product.skipped.join(","))?;
        if let Some(acquisition) = &product.acquisition {
            write_string_attr(&group, "acquisition", acquisition)?;
        }
        match &product.data {
            ProductData::Frame(frame) => {
                group
                    .new_attr::<u64>()
                    .create("frame_index")?
                    .write_scalar(&(frame_index as u64))?;
                group
                    .new_dataset_builder()
                    .with_data(frame)
                    .create(DATA_NAME)?;
            }
            ProductData::Trace { time, data } => write_trace(&group, time, data)?,
            ProductData::Traces(traces) => {
                for (name, time, data) in traces.iter() {
                    let sub_group = group.create_group(name)?;
                    write_trace(&sub_group, time, data)?;
                }
            }
            ProductData::Channels { time, data } => {
                group.new_dataset_builder().with_data(time).create(TIME_NAME)?;
                group.new_dataset_builder().with_data(data).create(DATA_NAME)?;
            }
            // Point i belongs to the i-th acquisition of the included attribute
            ProductData::Points(points) => {
                let x: Array1<f64> = points.iter().map(|(_, x, _)| *x).collect();
                let y: Array1<f64> = points.iter().map(|(_, _, y)| *y).collect();
                group.new_dataset_builder().with_data(&x).create(X_NAME)?;
                group.new_dataset_builder().with_data(&y).create(Y_NAME)?;
            }
        }
        Ok(())
    }

    /// Flush and close the file
    pub fn close(self) -> Result<PathBuf, ReportError> {
        self.file_handle.flush()?;
        Ok(self.path)
    }
}

/// Write every product of a report to its diagnostics file. Reports without products write
/// nothing and return None.
pub fn write_diagnostics(
    report: &SessionReport,
    config: &Config,
) -> Result<Option<PathBuf>, ReportError> {
    if report.products.is_empty() {
        return Ok(None);
    }
    let path = config.get_diagnostics_path(&report.session_id);
    let writer = DiagnosticsWriter::new(&path, report)?;
    for product in report.products.iter() {
        writer.write_product(product, config.frame_index)?;
    }
    let path = writer.close()?;
    log::info!(
        "Wrote {} products to {}",
        report.products.len(),
        path.to_string_lossy()
    );
    Ok(Some(path))
}

fn yes_no(present: bool) -> &'static str {
    if present {
        "yes"
    } else {
        "no"
    }
}

/// Render the completeness table of a session as Markdown
pub fn render_completeness(completeness: &CompletenessReport) -> String {
    let mut table = String::from("| Acquisition |");
    for kind in SubStream::ALL.iter() {
        let _ = write!(table, " {} |", kind.label());
    }
    table.push_str("\n|---|");
    for _ in SubStream::ALL.iter() {
        table.push_str("---|");
    }
    table.push('\n');
    for acquisition in completeness.acquisitions.iter() {
        let _ = write!(table, "| {} |", acquisition.name);
        for kind in SubStream::ALL.iter() {
            let _ = write!(table, " {} |", yes_no(acquisition.has(*kind)));
        }
        table.push('\n');
    }
    table
}

fn render_session(report: &SessionReport, config: &Config) -> String {
    let mut section = format!("## {}\n\n", report.session_id);
    let _ = writeln!(section, "Asset: `{}`\n", report.asset_path);
    if let Some(failure) = &report.failure {
        let _ = writeln!(section, "**Error processing session:** {failure}\n");
        return section;
    }

    let _ = writeln!(section, "- Acquisitions: {}", report.num_acquisitions);
    match report.num_rois {
        Some(n) => {
            let _ = writeln!(section, "- ROIs: {n}");
        }
        None => section.push_str("- ROIs: unavailable\n"),
    }
    if let Some(warning) = &report.roi_warning {
        let _ = writeln!(section, "- Warning: {warning}");
    }
    section.push('\n');

    if !report.products.is_empty() {
        let file = config.get_relative_diagnostics_path(&report.session_id);
        section.push_str("### Products\n\n");
        for product in report.products.iter() {
            let _ = write!(section, "- {}: `{}#/{}`", product.title, file, product.name);
            if !product.skipped.is_empty() {
                let _ = write!(section, " (skipped: {})", product.skipped.join(", "));
            }
            section.push('\n');
        }
        section.push('\n');
    }

    if !report.completeness.acquisitions.is_empty() {
        section.push_str("### Completeness\n\n");
        section.push_str(&render_completeness(&report.completeness));
        section.push('\n');
    }

    if !report.product_errors.is_empty() {
        section.push_str("### Errors\n\n");
        for (name, error) in report.product_errors.iter() {
            let _ = writeln!(section, "- {name}: {error}");
        }
        section.push('\n');
    }
    section
}

/// Render the Markdown index of every report so far
pub fn render_index(
    config: &Config,
    reports: &[SessionReport],
    generated: OffsetDateTime,
) -> String {
    let mut index = format!("# Dandiset {}\n\n", config.dandiset_id);
    let stamp = generated
        .format(&Rfc3339)
        .unwrap_or_else(|_| generated.to_string());
    let _ = writeln!(
        index,
        "Version {} | {} sessions | generated {}\n",
        config.dandiset_version,
        reports.len(),
        stamp
    );
    for report in reports.iter() {
        index.push_str(&render_session(report, config));
    }
    index
}

/// Rewrite the index file from scratch
pub fn write_index(config: &Config, reports: &[SessionReport]) -> Result<PathBuf, ReportError> {
    let path = config.get_index_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, render_index(config, reports, OffsetDateTime::now_utc()))?;
    Ok(path)
}
