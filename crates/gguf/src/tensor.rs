//! Tensor views into a frozen arena.

use std::sync::Arc;

use crate::{container::MAX_DIMENSIONS, Type};

/// A named, typed, shaped view into a loaded arena.
///
/// A tensor never owns its bytes; it shares ownership of the arena storage,
/// so a view is alive exactly as long as any handle to the arena is.
/// Cloning is cheap.
#[derive(Clone)]
pub struct Tensor {
    name: String,
    n_dims: usize,
    dims: [usize; MAX_DIMENSIONS],
    element_type: Type,
    data: Arc<[u8]>,
    offset: usize,
    len: usize,
}

impl Tensor {
    /// Creates a view over `data[offset..]` with the given shape.
    ///
    /// # Panics
    /// Panics if more than [MAX_DIMENSIONS] dimensions are given, or if the
    /// view does not fit inside `data`.
    pub fn new(
        name: impl Into<String>,
        dimensions: &[usize],
        element_type: Type,
        data: Arc<[u8]>,
        offset: usize,
    ) -> Self {
        assert!(
            dimensions.len() <= MAX_DIMENSIONS,
            "tensor must have at most {MAX_DIMENSIONS} dimensions"
        );
        let mut dims = [1usize; MAX_DIMENSIONS];
        dims[..dimensions.len()].copy_from_slice(dimensions);
        let len = dims.iter().product::<usize>() * element_type.element_size();
        assert!(offset + len <= data.len(), "tensor view out of bounds");
        Self {
            name: name.into(),
            n_dims: dimensions.len(),
            dims,
            element_type,
            data,
            offset,
            len,
        }
    }

    /// The name of the tensor.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dimensions of the tensor, fastest-varying first.
    pub fn dims(&self) -> &[usize] {
        &self.dims[..self.n_dims]
    }

    /// The type of the tensor's elements.
    pub fn element_type(&self) -> Type {
        self.element_type
    }

    /// The number of elements in the tensor.
    pub fn n_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Number of bytes used by this tensor.
    pub fn nbytes(&self) -> usize {
        self.len
    }

    /// The tensor's payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.len]
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("name", &self.name)
            .field("dims", &self.dims())
            .field("element_type", &self.element_type)
            .field("nbytes", &self.len)
            .finish()
    }
}
