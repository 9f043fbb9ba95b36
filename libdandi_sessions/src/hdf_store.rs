use hdf5::{File, Location};
use ndarray::{s, Array2, ArrayD, Ix2};
use std::path::{Path, PathBuf};

use super::error::StoreError;
use super::store::{check_frame_request, join_path, NwbStore};

/// A simple struct which wraps around the hdf5-rust library for reading NWB files.
///
/// The file is validated when the store is opened, and reopened for each read so that the
/// store can be shared across threads.
#[derive(Debug)]
pub struct Hdf5Store {
    source: String,
    file_path: PathBuf,
}

impl Hdf5Store {
    /// Open the HDF5 file at file_path. The source is the location the file came from
    /// (typically the remote URL it was downloaded from)
    pub fn open(source: &str, file_path: &Path) -> Result<Self, StoreError> {
        if !file_path.exists() {
            return Err(StoreError::NotFound(file_path.to_string_lossy().to_string()));
        }
        File::open(file_path)?;
        Ok(Self {
            source: source.to_string(),
            file_path: file_path.to_path_buf(),
        })
    }

    pub fn get_file_path(&self) -> &Path {
        &self.file_path
    }

    fn file(&self) -> Result<File, StoreError> {
        Ok(File::open(&self.file_path)?)
    }
}

/// H5Lexists fails on paths with missing intermediate links, so walk the path one link at a time
fn object_exists(file: &File, path: &str) -> bool {
    let mut prefix = String::new();
    for component in path.split('/').filter(|c| !c.is_empty()) {
        prefix = join_path(&prefix, component);
        if !file.link_exists(&prefix) {
            return false;
        }
    }
    true
}

fn location_attr(location: &Location, path: &str, attr: &str) -> Result<f64, StoreError> {
    if !location.attr_names()?.iter().any(|name| name == attr) {
        return Err(StoreError::MissingAttribute {
            path: path.to_string(),
            attr: attr.to_string(),
        });
    }
    let values = location.attr(attr)?.read_raw::<f64>()?;
    match values.as_slice() {
        [value] => Ok(*value),
        _ => Err(StoreError::BadMetadata {
            path: path.to_string(),
            reason: format!("attribute {attr} holds {} values", values.len()),
        }),
    }
}

impl NwbStore for Hdf5Store {
    fn source(&self) -> &str {
        &self.source
    }

    fn member_names(&self, group: &str) -> Result<Vec<String>, StoreError> {
        let file = self.file()?;
        if group.is_empty() {
            return Ok(file.member_names()?);
        }
        if !object_exists(&file, group) {
            return Err(StoreError::NotFound(group.to_string()));
        }
        match file.group(group) {
            Ok(g) => Ok(g.member_names()?),
            Err(_) => Err(StoreError::NotAGroup(group.to_string())),
        }
    }

    fn exists(&self, path: &str) -> bool {
        match self.file() {
            Ok(file) => object_exists(&file, path),
            Err(_) => false,
        }
    }

    fn read_scalar(&self, path: &str) -> Result<f64, StoreError> {
        let file = self.file()?;
        if !object_exists(&file, path) {
            return Err(StoreError::NotFound(path.to_string()));
        }
        let dataset = file
            .dataset(path)
            .map_err(|_| StoreError::NotADataset(path.to_string()))?;
        let values = dataset.read_raw::<f64>()?;
        match values.as_slice() {
            [value] => Ok(*value),
            _ => Err(StoreError::BadMetadata {
                path: path.to_string(),
                reason: format!("expected a scalar, found shape {:?}", dataset.shape()),
            }),
        }
    }

    fn read_attr(&self, path: &str, attr: &str) -> Result<f64, StoreError> {
        let file = self.file()?;
        if path.is_empty() {
            return location_attr(&file, path, attr);
        }
        if !object_exists(&file, path) {
            return Err(StoreError::NotFound(path.to_string()));
        }
        if let Ok(dataset) = file.dataset(path) {
            location_attr(&dataset, path, attr)
        } else {
            let group = file.group(path)?;
            location_attr(&group, path, attr)
        }
    }

    fn shape(&self, path: &str) -> Result<Vec<usize>, StoreError> {
        let file = self.file()?;
        if !object_exists(&file, path) {
            return Err(StoreError::NotFound(path.to_string()));
        }
        match file.dataset(path) {
            Ok(dataset) => Ok(dataset.shape()),
            Err(_) => Err(StoreError::NotADataset(path.to_string())),
        }
    }

    fn read_array(&self, path: &str) -> Result<ArrayD<f64>, StoreError> {
        let file = self.file()?;
        if !object_exists(&file, path) {
            return Err(StoreError::NotFound(path.to_string()));
        }
        let dataset = file
            .dataset(path)
            .map_err(|_| StoreError::NotADataset(path.to_string()))?;
        Ok(dataset.read_dyn::<f64>()?)
    }

    fn read_frame(&self, path: &str, index: usize) -> Result<Array2<f64>, StoreError> {
        let file = self.file()?;
        if !object_exists(&file, path) {
            return Err(StoreError::NotFound(path.to_string()));
        }
        let dataset = file
            .dataset(path)
            .map_err(|_| StoreError::NotADataset(path.to_string()))?;
        check_frame_request(path, &dataset.shape(), index)?;
        Ok(dataset.read_slice::<f64, _, Ix2>(s![index, .., ..])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr0, Array1, Array3};

    fn write_test_file(path: &Path) {
        let file = File::create(path).unwrap();
        let acquisition = file.create_group("acquisition").unwrap();
        acquisition.create_group("TwoPhotonSeries_001").unwrap();
        let series = acquisition.create_group("TwoPhotonSeries_000").unwrap();
        let frames = Array3::<u8>::from_shape_fn((4, 3, 2), |(f, r, c)| (f * 10 + r * 2 + c) as u8);
        series
            .new_dataset_builder()
            .with_data(&frames)
            .create("data")
            .unwrap();
        let starting_time = series
            .new_dataset_builder()
            .with_data(&arr0(12.5))
            .create("starting_time")
            .unwrap();
        starting_time
            .new_attr::<f32>()
            .create("rate")
            .unwrap()
            .write_scalar(&15.0f32)
            .unwrap();
        let radius = file
            .create_group("processing")
            .unwrap()
            .create_group("behavior")
            .unwrap();
        radius
            .new_dataset_builder()
            .with_data(&Array1::from(vec![1.0f64, 2.0, 3.0]))
            .create("values")
            .unwrap();
    }

    #[test]
    fn test_read_nwb_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.nwb");
        write_test_file(&path);

        let store = Hdf5Store::open("https://example.org/session.nwb", &path).unwrap();
        assert_eq!(store.source(), "https://example.org/session.nwb");
        assert_eq!(
            store.member_names("acquisition").unwrap(),
            vec!["TwoPhotonSeries_000", "TwoPhotonSeries_001"]
        );
        assert_eq!(
            store
                .read_scalar("acquisition/TwoPhotonSeries_000/starting_time")
                .unwrap(),
            12.5
        );
        assert_eq!(
            store
                .read_attr("acquisition/TwoPhotonSeries_000/starting_time", "rate")
                .unwrap(),
            15.0
        );
        assert_eq!(
            store.shape("acquisition/TwoPhotonSeries_000/data").unwrap(),
            vec![4, 3, 2]
        );
        let frame = store
            .read_frame("acquisition/TwoPhotonSeries_000/data", 3)
            .unwrap();
        assert_eq!(frame.shape(), &[3, 2]);
        assert_eq!(frame[[2, 1]], 35.0);
        assert_eq!(
            store.read_array("processing/behavior/values").unwrap().len(),
            3
        );
    }

    #[test]
    fn test_missing_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.nwb");
        write_test_file(&path);
        let store = Hdf5Store::open("local", &path).unwrap();

        assert!(!store.exists("processing/ophys/Fluorescence"));
        assert!(store.exists("processing/behavior"));
        assert!(matches!(
            store.shape("processing/ophys/Fluorescence/RoiResponseSeries_000/data"),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.read_frame("acquisition/TwoPhotonSeries_000/data", 4),
            Err(StoreError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            Hdf5Store::open("local", &dir.path().join("nothing.nwb")),
            Err(StoreError::NotFound(_))
        ));
    }
}
