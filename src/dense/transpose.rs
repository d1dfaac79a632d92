use crate::error::{Error, Result};
use crate::utils::Element;

use super::{ArrayAccess, ArrayAccessMut, DenseArray};

/// Zero-copy transposed view borrowing a [`DenseArray`].
///
/// `size0`/`size1` and the index order are swapped; nothing is copied.
#[derive(Clone, Copy)]
pub struct Transposed<'a, T: Element> {
    array: &'a DenseArray<T>,
}

impl<'a, T: Element> Transposed<'a, T> {
    pub(super) fn new(array: &'a DenseArray<T>) -> Self {
        Self { array }
    }

    /// Transposing a view gives back the borrowed array itself.
    pub fn transpose(self) -> &'a DenseArray<T> {
        self.array
    }
}

impl<T: Element> ArrayAccess<T> for Transposed<'_, T> {
    fn size0(&self) -> usize {
        self.array.size1()
    }

    fn size1(&self) -> usize {
        self.array.size0()
    }

    fn get(&self, index: usize) -> Result<T> {
        self.array.get(index)
    }

    fn get_at(&self, i0: usize, i1: usize) -> Result<T> {
        check_indexes(self, i0, i1)?;
        self.array.get_at(i1, i0)
    }
}

/// Mutable counterpart of [`Transposed`]; writes land in the underlying
/// array.
pub struct TransposedMut<'a, T: Element> {
    array: &'a mut DenseArray<T>,
}

impl<'a, T: Element> TransposedMut<'a, T> {
    pub(super) fn new(array: &'a mut DenseArray<T>) -> Self {
        Self { array }
    }

    pub fn transpose(self) -> &'a mut DenseArray<T> {
        self.array
    }
}

impl<T: Element> ArrayAccess<T> for TransposedMut<'_, T> {
    fn size0(&self) -> usize {
        self.array.size1()
    }

    fn size1(&self) -> usize {
        self.array.size0()
    }

    fn get(&self, index: usize) -> Result<T> {
        self.array.get(index)
    }

    fn get_at(&self, i0: usize, i1: usize) -> Result<T> {
        check_indexes(self, i0, i1)?;
        self.array.get_at(i1, i0)
    }
}

impl<T: Element> ArrayAccessMut<T> for TransposedMut<'_, T> {
    fn set(&mut self, index: usize, value: T) -> Result<()> {
        self.array.set(index, value)
    }

    fn set_at(&mut self, i0: usize, i1: usize, value: T) -> Result<()> {
        check_indexes(self, i0, i1)?;
        self.array.set_at(i1, i0, value)
    }
}

fn check_indexes<T: Element, A: ArrayAccess<T>>(view: &A, i0: usize, i1: usize) -> Result<()> {
    if i0 >= view.size0() {
        return Err(Error::OutOfRange {
            index: i0,
            bound: view.size0(),
        });
    }
    if i1 >= view.size1() {
        return Err(Error::OutOfRange {
            index: i1,
            bound: view.size1(),
        });
    }
    Ok(())
}
