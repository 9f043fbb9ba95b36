use ndarray::{Array1, Array2, Axis, Ix2};
use std::sync::Arc;

use super::error::{SeriesError, StoreError};
use super::store::{join_path, NwbStore};

const DATA_NAME: &str = "data";
const STARTING_TIME_NAME: &str = "starting_time";
const RATE_ATTR: &str = "rate";

/// The contract shared by every regularly sampled series.
///
/// Timestamps are never stored; they are derived from the starting time and the rate each
/// time they are requested. Two series of one session do not share a clock zero, so compare
/// them through [`TimeSeries::get_rebased_timestamps`].
pub trait TimeSeries {
    /// Offset in seconds of the first sample
    fn starting_time(&self) -> f64;

    /// Sampling rate in Hz
    fn rate(&self) -> f64;

    /// Length of the leading axis of the data
    fn num_samples(&self) -> usize;

    /// `timestamp[i] = starting_time + i / rate`
    fn get_timestamps(&self) -> Array1<f64> {
        let t0 = self.starting_time();
        let rate = self.rate();
        Array1::from_iter((0..self.num_samples()).map(|i| t0 + i as f64 / rate))
    }

    /// Timestamps relative to this series' own starting time
    fn get_rebased_timestamps(&self) -> Array1<f64> {
        self.get_timestamps() - self.starting_time()
    }

    /// Time spanned from the first to the last sample
    fn duration(&self) -> f64 {
        match self.num_samples() {
            0 => 0.0,
            n => (n - 1) as f64 / self.rate(),
        }
    }
}

/// Metadata common to the three series shapes, read once at construction
#[derive(Debug, Clone)]
struct SeriesHeader {
    store: Arc<dyn NwbStore>,
    path: String,
    starting_time: f64,
    rate: f64,
    shape: Vec<usize>,
}

impl SeriesHeader {
    fn read(store: Arc<dyn NwbStore>, path: &str) -> Result<Self, SeriesError> {
        let time_path = join_path(path, STARTING_TIME_NAME);
        let starting_time = store.read_scalar(&time_path)?;
        if !starting_time.is_finite() {
            return Err(SeriesError::InvalidStartingTime {
                path: path.to_string(),
                time: starting_time,
            });
        }
        let rate = store.read_attr(&time_path, RATE_ATTR)?;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(SeriesError::InvalidRate {
                path: path.to_string(),
                rate,
            });
        }
        let shape = store.shape(&join_path(path, DATA_NAME))?;
        Ok(Self {
            store,
            path: path.to_string(),
            starting_time,
            rate,
            shape,
        })
    }

    fn data_path(&self) -> String {
        join_path(&self.path, DATA_NAME)
    }

    fn bad_shape(&self, expected: &'static str) -> SeriesError {
        SeriesError::BadShape {
            path: self.path.clone(),
            shape: self.shape.clone(),
            expected,
        }
    }

    fn shape_error(&self, e: ndarray::ShapeError) -> SeriesError {
        SeriesError::StoreError(StoreError::BadMetadata {
            path: self.data_path(),
            reason: e.to_string(),
        })
    }
}

macro_rules! impl_time_series {
    ($series:ty) => {
        impl TimeSeries for $series {
            fn starting_time(&self) -> f64 {
                self.header.starting_time
            }

            fn rate(&self) -> f64 {
                self.header.rate
            }

            fn num_samples(&self) -> usize {
                self.header.shape[0]
            }
        }

        impl $series {
            /// Location of the series in the file
            pub fn path(&self) -> &str {
                &self.header.path
            }
        }
    };
}

/// A one dimensional measurement series (e.g. pupil radius)
#[derive(Debug, Clone)]
pub struct SingleChannelSeries {
    header: SeriesHeader,
}

impl SingleChannelSeries {
    /// Data must be `(samples,)` or `(samples, 1)`
    pub fn new(store: Arc<dyn NwbStore>, path: &str) -> Result<Self, SeriesError> {
        let header = SeriesHeader::read(store, path)?;
        match header.shape.as_slice() {
            [_] | [_, 1] => Ok(Self { header }),
            _ => Err(header.bad_shape("(samples,) or (samples, 1)")),
        }
    }

    /// Read the full payload. Not cached.
    pub fn get_data(&self) -> Result<Array1<f64>, SeriesError> {
        let data = self.header.store.read_array(&self.header.data_path())?;
        let n = data.len();
        data.into_shape(n).map_err(|e| self.header.shape_error(e))
    }
}

/// A (samples x channels) response series (e.g. ROI fluorescence)
#[derive(Debug, Clone)]
pub struct MultiChannelSeries {
    header: SeriesHeader,
}

impl MultiChannelSeries {
    pub fn new(store: Arc<dyn NwbStore>, path: &str) -> Result<Self, SeriesError> {
        let header = SeriesHeader::read(store, path)?;
        if header.shape.len() != 2 {
            return Err(header.bad_shape("(samples, channels)"));
        }
        Ok(Self { header })
    }

    pub fn num_channels(&self) -> usize {
        self.header.shape[1]
    }

    /// Read the full payload. Not cached.
    pub fn get_data(&self) -> Result<Array2<f64>, SeriesError> {
        self.header
            .store
            .read_array(&self.header.data_path())?
            .into_dimensionality::<Ix2>()
            .map_err(|e| self.header.shape_error(e))
    }

    /// Read one channel (0-based)
    pub fn get_channel(&self, index: usize) -> Result<Array1<f64>, SeriesError> {
        if index >= self.num_channels() {
            return Err(SeriesError::BadChannel {
                path: self.header.path.clone(),
                index,
                count: self.num_channels(),
            });
        }
        Ok(self.get_data()?.index_axis_move(Axis(1), index))
    }
}

/// A sequence of 2-D frames (two-photon imaging, pupil video)
#[derive(Debug, Clone)]
pub struct FrameSeries {
    header: SeriesHeader,
}

impl FrameSeries {
    pub fn new(store: Arc<dyn NwbStore>, path: &str) -> Result<Self, SeriesError> {
        let header = SeriesHeader::read(store, path)?;
        if header.shape.len() != 3 {
            return Err(header.bad_shape("(frames, height, width)"));
        }
        Ok(Self { header })
    }

    pub fn num_frames(&self) -> usize {
        self.num_samples()
    }

    /// (height, width)
    pub fn frame_shape(&self) -> (usize, usize) {
        (self.header.shape[1], self.header.shape[2])
    }

    /// Read frame i. Indices outside `[0, num_frames)` are an error, never clamped.
    pub fn get_frame(&self, index: usize) -> Result<Array2<f64>, SeriesError> {
        if index >= self.num_frames() {
            return Err(SeriesError::StoreError(StoreError::IndexOutOfRange {
                path: self.header.data_path(),
                index,
                count: self.num_frames(),
            }));
        }
        Ok(self.header.store.read_frame(&self.header.data_path(), index)?)
    }
}

impl_time_series!(SingleChannelSeries);
impl_time_series!(MultiChannelSeries);
impl_time_series!(FrameSeries);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use ndarray::{arr1, arr2, Array3};

    fn store_with(path: &str, t0: f64, rate: f64, data: ndarray::ArrayD<f64>) -> Arc<dyn NwbStore> {
        let mut store = MemoryStore::new("memory");
        store.add_time_series(path, t0, rate, data);
        Arc::new(store)
    }

    #[test]
    fn test_timestamps_are_derived_exactly() {
        let t0 = 1234.567;
        let rate = 29.97;
        let data = ndarray::Array1::<f64>::zeros(1000).into_dyn();
        let series = SingleChannelSeries::new(store_with("radius", t0, rate, data), "radius").unwrap();

        let first = series.get_timestamps();
        let second = series.get_timestamps();
        assert_eq!(first.len(), 1000);
        for (i, t) in first.iter().enumerate() {
            assert_eq!(*t, t0 + i as f64 / rate);
        }
        assert_eq!(first, second);
    }

    #[test]
    fn test_rebased_timestamps() {
        let series = SingleChannelSeries::new(
            store_with("radius", 100.0, 4.0, arr1(&[0.0, 0.0, 0.0]).into_dyn()),
            "radius",
        )
        .unwrap();
        assert_eq!(series.get_rebased_timestamps(), arr1(&[0.0, 0.25, 0.5]));
        assert_eq!(series.duration(), 0.5);
    }

    #[test]
    fn test_single_channel_accepts_column() {
        let series = SingleChannelSeries::new(
            store_with("radius", 0.0, 1.0, arr2(&[[1.0], [2.0], [3.0]]).into_dyn()),
            "radius",
        )
        .unwrap();
        assert_eq!(series.get_data().unwrap(), arr1(&[1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_shape_validation() {
        let store = store_with("x", 0.0, 1.0, arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn());
        assert!(matches!(
            SingleChannelSeries::new(store.clone(), "x"),
            Err(SeriesError::BadShape { .. })
        ));
        assert!(matches!(
            FrameSeries::new(store.clone(), "x"),
            Err(SeriesError::BadShape { .. })
        ));
        let series = MultiChannelSeries::new(store, "x").unwrap();
        assert_eq!(series.num_channels(), 2);
        assert_eq!(series.get_channel(1).unwrap(), arr1(&[2.0, 4.0]));
        assert!(matches!(
            series.get_channel(2),
            Err(SeriesError::BadChannel { .. })
        ));
    }

    #[test]
    fn test_invalid_rate() {
        let store = store_with("x", 0.0, 0.0, arr1(&[1.0]).into_dyn());
        assert!(matches!(
            SingleChannelSeries::new(store, "x"),
            Err(SeriesError::InvalidRate { .. })
        ));
    }

    #[test]
    fn test_get_frame_does_not_clamp() {
        let data = Array3::from_shape_fn((5, 4, 3), |(f, _, _)| f as f64);
        let series = FrameSeries::new(store_with("video", 0.0, 10.0, data.into_dyn()), "video").unwrap();
        assert_eq!(series.num_frames(), 5);
        assert_eq!(series.frame_shape(), (4, 3));
        assert!(series.get_frame(4).unwrap().iter().all(|v| *v == 4.0));
        assert!(matches!(
            series.get_frame(5),
            Err(SeriesError::StoreError(StoreError::IndexOutOfRange {
                index: 5,
                count: 5,
                ..
            }))
        ));
    }
}
