//! Numeric values carried by ports and stored in the logs.
//!
//! A [`Signal`] is a dense n-dimensional `f64` array in row-major order.
//! Scalars have an empty shape, vectors a shape of length one.

use serde::{Deserialize, Serialize};

/// A dense n-dimensional array of `f64`.
///
/// Deserialization goes through [`Signal::new`], so a frame whose data does
/// not fill its shape is rejected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSignal")]
pub struct Signal {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Signal {
    /// Creates a signal from a shape and row-major data.
    ///
    /// Returns `None` if the element count does not match the shape.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Option<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return None;
        }
        Some(Self { shape, data })
    }

    /// Creates a rank-0 signal.
    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    /// Creates a rank-1 signal.
    pub fn vector(values: Vec<f64>) -> Self {
        Self {
            shape: vec![values.len()],
            data: values,
        }
    }

    /// Creates a rank-2 signal from rows of equal length.
    ///
    /// Returns `None` for ragged rows.
    pub fn matrix(rows: Vec<Vec<f64>>) -> Option<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != cols) {
            return None;
        }
        let n_rows = rows.len();
        let data = rows.into_iter().flatten().collect();
        Some(Self {
            shape: vec![n_rows, cols],
            data,
        })
    }

    /// Creates a zero vector of the given length.
    pub fn zeros(len: usize) -> Self {
        Self::vector(vec![0.0; len])
    }

    /// Returns the shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the signal holds no element.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the row-major data.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Consumes the signal and returns its row-major data.
    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Returns the element at a multi-index, if in bounds.
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut flat = 0;
        for (&i, &dim) in index.iter().zip(&self.shape) {
            if i >= dim {
                return None;
            }
            flat = flat * dim + i;
        }
        self.data.get(flat).copied()
    }

    /// Applies `f` to every element, keeping the shape.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }
}

/// Unchecked wire form of a [`Signal`].
#[derive(Deserialize)]
struct RawSignal {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl TryFrom<RawSignal> for Signal {
    type Error = String;

    fn try_from(raw: RawSignal) -> Result<Self, Self::Error> {
        let (shape, len) = (raw.shape.clone(), raw.data.len());
        Signal::new(raw.shape, raw.data)
            .ok_or_else(|| format!("signal of shape {:?} cannot hold {} elements", shape, len))
    }
}

impl From<f64> for Signal {
    fn from(value: f64) -> Self {
        Signal::scalar(value)
    }
}

impl From<Vec<f64>> for Signal {
    fn from(values: Vec<f64>) -> Self {
        Signal::vector(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let s = Signal::scalar(2.5);
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.len(), 1);

        let v = Signal::vector(vec![1.0, 2.0, 3.0]);
        assert_eq!(v.shape(), &[3]);

        let m = Signal::matrix(vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        assert_eq!(m.shape(), &[3, 2]);
        assert_eq!(m.get(&[2, 1]), Some(6.0));
        assert_eq!(m.get(&[3, 0]), None);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(Signal::new(vec![2, 2], vec![1.0; 3]).is_none());
        assert!(Signal::matrix(vec![vec![1.0], vec![1.0, 2.0]]).is_none());
    }

    #[test]
    fn test_deserialize_checks_element_count() {
        let m: Signal = serde_json::from_str(r#"{"shape":[2,2],"data":[1,2,3,4]}"#).unwrap();
        assert_eq!(m.get(&[1, 0]), Some(3.0));

        let err = serde_json::from_str::<Signal>(r#"{"shape":[2,2],"data":[1,2,3,4,5]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("cannot hold 5 elements"));
        assert!(serde_json::from_str::<Signal>(r#"{"shape":[],"data":[]}"#).is_err());
    }

    #[test]
    fn test_zeros() {
        let z = Signal::zeros(4);
        assert_eq!(z.as_slice(), &[0.0; 4]);
    }
}
