use fxhash::FxHashMap;
use ndarray::{Array2, ArrayD, Axis, Ix2, IxDyn};
use std::fmt::Debug;

use super::error::StoreError;

/// The handle a Session holds onto an opened NWB file.
///
/// Paths are `/` separated and relative to the file root, which is the empty path `""`.
/// Every numeric read is converted to `f64`; the payload is read fresh on every call.
pub trait NwbStore: Send + Sync + Debug {
    /// The location this store was opened from (URL or file path)
    fn source(&self) -> &str;

    /// Names of the members of a group, in the order the file lists them
    fn member_names(&self, group: &str) -> Result<Vec<String>, StoreError>;

    /// Whether any object (group or dataset) exists at the path
    fn exists(&self, path: &str) -> bool;

    /// Read a single value dataset
    fn read_scalar(&self, path: &str) -> Result<f64, StoreError>;

    /// Read a numeric attribute of an object
    fn read_attr(&self, path: &str, attr: &str) -> Result<f64, StoreError>;

    /// Shape of a dataset
    fn shape(&self, path: &str) -> Result<Vec<usize>, StoreError>;

    /// Read an entire dataset
    fn read_array(&self, path: &str) -> Result<ArrayD<f64>, StoreError>;

    /// Read one 2-D slab along the leading axis of a rank 3 dataset
    fn read_frame(&self, path: &str, index: usize) -> Result<Array2<f64>, StoreError>;
}

/// Join a group path and a member name
pub fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}/{child}")
    }
}

/// Check a frame request against a dataset shape, shared by all stores
pub(crate) fn check_frame_request(
    path: &str,
    shape: &[usize],
    index: usize,
) -> Result<(), StoreError> {
    if shape.len() != 3 {
        return Err(StoreError::BadRank {
            path: path.to_string(),
            rank: shape.len(),
            expected: 3,
        });
    }
    if index >= shape[0] {
        return Err(StoreError::IndexOutOfRange {
            path: path.to_string(),
            index,
            count: shape[0],
        });
    }
    Ok(())
}

/// An in-memory NWB tree.
///
/// Groups keep their members in insertion order. Adding a dataset creates any missing
/// parent groups.
#[derive(Debug, Default)]
pub struct MemoryStore {
    source: String,
    groups: FxHashMap<String, Vec<String>>,
    datasets: FxHashMap<String, ArrayD<f64>>,
    attributes: FxHashMap<String, FxHashMap<String, f64>>,
}

impl MemoryStore {
    pub fn new(source: &str) -> Self {
        let mut store = Self {
            source: source.to_string(),
            ..Default::default()
        };
        store.groups.insert(String::new(), Vec::new());
        store
    }

    /// Create a group (and its parents) if it does not exist
    pub fn add_group(&mut self, path: &str) {
        self.register(path);
        self.groups.entry(path.to_string()).or_default();
    }

    pub fn add_dataset(&mut self, path: &str, data: ArrayD<f64>) {
        self.register(path);
        self.datasets.insert(path.to_string(), data);
    }

    pub fn add_scalar(&mut self, path: &str, value: f64) {
        self.add_dataset(path, ArrayD::from_elem(IxDyn(&[]), value));
    }

    pub fn set_attr(&mut self, path: &str, name: &str, value: f64) {
        self.attributes
            .entry(path.to_string())
            .or_default()
            .insert(name.to_string(), value);
    }

    /// Write the standard NWB layout of a regularly sampled series: a `data` dataset and a
    /// `starting_time` dataset carrying the `rate` attribute.
    pub fn add_time_series(&mut self, path: &str, starting_time: f64, rate: f64, data: ArrayD<f64>) {
        self.add_group(path);
        let time_path = join_path(path, "starting_time");
        self.add_scalar(&time_path, starting_time);
        self.set_attr(&time_path, "rate", rate);
        self.add_dataset(&join_path(path, "data"), data);
    }

    /// Make every ancestor of path a group which lists the next component as a member
    fn register(&mut self, path: &str) {
        let mut parent = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let members = self.groups.entry(parent.clone()).or_default();
            if !members.iter().any(|m| m == component) {
                members.push(component.to_string());
            }
            parent = join_path(&parent, component);
        }
    }

    fn dataset(&self, path: &str) -> Result<&ArrayD<f64>, StoreError> {
        match self.datasets.get(path) {
            Some(data) => Ok(data),
            None if self.groups.contains_key(path) => {
                Err(StoreError::NotADataset(path.to_string()))
            }
            None => Err(StoreError::NotFound(path.to_string())),
        }
    }
}

impl NwbStore for MemoryStore {
    fn source(&self) -> &str {
        &self.source
    }

    fn member_names(&self, group: &str) -> Result<Vec<String>, StoreError> {
        match self.groups.get(group) {
            Some(members) => Ok(members.clone()),
            None if self.datasets.contains_key(group) => {
                Err(StoreError::NotAGroup(group.to_string()))
            }
            None => Err(StoreError::NotFound(group.to_string())),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.groups.contains_key(path) || self.datasets.contains_key(path)
    }

    fn read_scalar(&self, path: &str) -> Result<f64, StoreError> {
        let data = self.dataset(path)?;
        match (data.len(), data.iter().next()) {
            (1, Some(value)) => Ok(*value),
            _ => Err(StoreError::BadMetadata {
                path: path.to_string(),
                reason: format!("expected a scalar, found shape {:?}", data.shape()),
            }),
        }
    }

    fn read_attr(&self, path: &str, attr: &str) -> Result<f64, StoreError> {
        if !self.exists(path) {
            return Err(StoreError::NotFound(path.to_string()));
        }
        self.attributes
            .get(path)
            .and_then(|attrs| attrs.get(attr))
            .copied()
            .ok_or_else(|| StoreError::MissingAttribute {
                path: path.to_string(),
                attr: attr.to_string(),
            })
    }

    fn shape(&self, path: &str) -> Result<Vec<usize>, StoreError> {
        Ok(self.dataset(path)?.shape().to_vec())
    }

    fn read_array(&self, path: &str) -> Result<ArrayD<f64>, StoreError> {
        Ok(self.dataset(path)?.clone())
    }

    fn read_frame(&self, path: &str, index: usize) -> Result<Array2<f64>, StoreError> {
        let data = self.dataset(path)?;
        check_frame_request(path, data.shape(), index)?;
        data.index_axis(Axis(0), index)
            .to_owned()
            .into_dimensionality::<Ix2>()
            .map_err(|e| StoreError::BadMetadata {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array3};

    #[test]
    fn test_groups_keep_insertion_order() {
        let mut store = MemoryStore::new("memory");
        store.add_group("acquisition/TwoPhotonSeries_001");
        store.add_group("acquisition/TwoPhotonSeries_000");
        store.add_group("acquisition/Foo");
        assert_eq!(
            store.member_names("acquisition").unwrap(),
            vec!["TwoPhotonSeries_001", "TwoPhotonSeries_000", "Foo"]
        );
        assert_eq!(store.member_names("").unwrap(), vec!["acquisition"]);
    }

    #[test]
    fn test_time_series_layout() {
        let mut store = MemoryStore::new("memory");
        store.add_time_series("ts", 2.5, 30.0, arr1(&[1.0, 2.0]).into_dyn());
        assert_eq!(store.read_scalar("ts/starting_time").unwrap(), 2.5);
        assert_eq!(store.read_attr("ts/starting_time", "rate").unwrap(), 30.0);
        assert_eq!(store.shape("ts/data").unwrap(), vec![2]);
        assert!(matches!(
            store.read_attr("ts/starting_time", "unit"),
            Err(StoreError::MissingAttribute { .. })
        ));
        assert!(matches!(
            store.read_array("ts"),
            Err(StoreError::NotADataset(_))
        ));
        assert!(matches!(
            store.member_names("ts/data"),
            Err(StoreError::NotAGroup(_))
        ));
    }

    #[test]
    fn test_read_frame() {
        let mut store = MemoryStore::new("memory");
        let data = Array3::from_shape_fn((3, 2, 2), |(f, r, c)| (f * 100 + r * 10 + c) as f64);
        store.add_dataset("video", data.into_dyn());
        let frame = store.read_frame("video", 2).unwrap();
        assert_eq!(frame[[1, 1]], 211.0);
        assert!(matches!(
            store.read_frame("video", 3),
            Err(StoreError::IndexOutOfRange { index: 3, count: 3, .. })
        ));
    }
}
