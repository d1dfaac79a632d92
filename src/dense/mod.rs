//! # Memory-mapped dense arrays
//!
//! [`DenseArray`] stores `size0 * size1` elements row-major in a mapped byte
//! region. The region is either an anonymous mapping (scratch buffers, factor
//! matrices) or a file with a small header in front of the data, so arrays
//! larger than RAM are paged by the OS instead of allocated on the heap.
//!
//! Every access goes through a bounds-checked byte offset
//! `(i0 * size1 + i1) * size_of::<T>()`, including the row accessors used by
//! the parallel kernels.

mod header;
mod transpose;

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::utils::{checked_byte_len, to_i32, Element};

use header::{ArrayHeader, HEADER_SIZE};
pub use transpose::{Transposed, TransposedMut};

/// Read access shared by arrays and their transposed views.
pub trait ArrayAccess<T: Element> {
    fn size0(&self) -> usize;

    fn size1(&self) -> usize;

    fn num_elements(&self) -> usize {
        self.size0() * self.size1()
    }

    /// Reads element `index` of an array where one dimension equals 1.
    fn get(&self, index: usize) -> Result<T>;

    fn get_at(&self, i0: usize, i1: usize) -> Result<T>;
}

pub trait ArrayAccessMut<T: Element>: ArrayAccess<T> {
    fn set(&mut self, index: usize, value: T) -> Result<()>;

    fn set_at(&mut self, i0: usize, i1: usize, value: T) -> Result<()>;
}

enum Storage {
    Anonymous(MmapMut),
    File {
        mmap: MmapMut,
        // keeps the descriptor alive for the lifetime of the mapping
        _file: File,
        path: PathBuf,
    },
}

impl Storage {
    fn mmap(&self) -> &MmapMut {
        match self {
            Storage::Anonymous(mmap) => mmap,
            Storage::File { mmap, .. } => mmap,
        }
    }

    fn mmap_mut(&mut self) -> &mut MmapMut {
        match self {
            Storage::Anonymous(mmap) => mmap,
            Storage::File { mmap, .. } => mmap,
        }
    }
}

/// Typed two-dimensional array over a memory-mapped byte region.
pub struct DenseArray<T: Element> {
    size0: usize,
    size1: usize,
    data_offset: usize,
    data_len: usize,
    storage: Option<Storage>,
    _marker: PhantomData<T>,
}

impl<T: Element> DenseArray<T> {
    /// Allocates a zero-filled `size0 x size1` array in an anonymous mapping.
    pub fn new(size0: usize, size1: usize) -> Result<Self> {
        validate_dimensions(size0, size1)?;
        let data_len = checked_byte_len(size0, size1, T::SIZE)?;
        let mmap = MmapMut::map_anon(data_len)?;

        Ok(Self {
            size0,
            size1,
            data_offset: 0,
            data_len,
            storage: Some(Storage::Anonymous(mmap)),
            _marker: PhantomData,
        })
    }

    /// Allocates a `1 x len` array.
    pub fn new_1d(len: usize) -> Result<Self> {
        Self::new(1, len)
    }

    /// Creates (or truncates) `path` and maps a zero-filled array behind a
    /// `{type code, size0, size1}` header.
    pub fn create<P: AsRef<Path>>(path: P, size0: usize, size1: usize) -> Result<Self> {
        validate_dimensions(size0, size1)?;
        let header =
            ArrayHeader::for_element::<T>(to_i32(size0, "size0")?, to_i32(size1, "size1")?);
        let data_len = checked_byte_len(size0, size1, T::SIZE)?;
        let file_len = data_len
            .checked_add(HEADER_SIZE)
            .ok_or_else(|| Error::argument("array file length overflows"))?;

        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(&header.encode())?;
        file.set_len(file_len as u64)?;

        // SAFETY: the file was just created by us and is sized to the mapping.
        let mmap = unsafe { MmapOptions::new().len(file_len).map_mut(&file)? };
        log::debug!("created {}x{} array file {}", size0, size1, path.display());

        Ok(Self {
            size0,
            size1,
            data_offset: HEADER_SIZE,
            data_len,
            storage: Some(Storage::File {
                mmap,
                _file: file,
                path,
            }),
            _marker: PhantomData,
        })
    }

    /// Maps an existing array file after validating its header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_len = file.metadata()?.len();
        if file_len < HEADER_SIZE as u64 {
            return Err(Error::format(format!(
                "array file {} holds {} bytes, smaller than its {} byte header",
                path.display(),
                file_len,
                HEADER_SIZE
            )));
        }

        let mut header_bytes = [0u8; HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        let (size0, size1) = ArrayHeader::decode(&header_bytes)?.validate::<T>()?;
        let data_len = checked_byte_len(size0, size1, T::SIZE)?;
        let expected_len = (HEADER_SIZE + data_len) as u64;
        if file_len < expected_len {
            return Err(Error::format(format!(
                "array file {} holds {} bytes, {}x{} elements need {}",
                path.display(),
                file_len,
                size0,
                size1,
                expected_len
            )));
        }

        // SAFETY: the mapping is limited to the validated length of the file.
        let mmap = unsafe {
            MmapOptions::new()
                .len(expected_len as usize)
                .map_mut(&file)?
        };

        Ok(Self {
            size0,
            size1,
            data_offset: HEADER_SIZE,
            data_len,
            storage: Some(Storage::File {
                mmap,
                _file: file,
                path,
            }),
            _marker: PhantomData,
        })
    }

    /// Copies a two-dimensional ndarray view into a new anonymous array.
    pub fn from_array2(view: ArrayView2<'_, T>) -> Result<Self> {
        let (size0, size1) = view.dim();
        let mut array = Self::new(size0, size1)?;
        for ((i0, i1), &value) in view.indexed_iter() {
            array.set_at(i0, i1, value)?;
        }
        Ok(array)
    }

    /// Copies the array into an owned ndarray matrix.
    pub fn to_array2(&self) -> Result<Array2<T>> {
        let values: Vec<T> = self.data()?.chunks_exact(T::SIZE).map(T::read_le).collect();
        Array2::from_shape_vec((self.size0, self.size1), values)
            .map_err(|e| Error::argument(format!("shape mismatch: {}", e)))
    }

    pub fn path(&self) -> Option<&Path> {
        match self.storage.as_ref()? {
            Storage::File { path, .. } => Some(path.as_path()),
            Storage::Anonymous(_) => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.storage.is_none()
    }

    /// Writes file-backed data through to disk. No-op for anonymous arrays.
    pub fn flush(&self) -> Result<()> {
        match self.storage.as_ref().ok_or(Error::Disposed("dense array"))? {
            Storage::File { mmap, .. } => Ok(mmap.flush()?),
            Storage::Anonymous(_) => Ok(()),
        }
    }

    /// Releases the mapping. Calling it again is a no-op; any other access
    /// afterwards fails with [`Error::Disposed`].
    pub fn close(&mut self) -> Result<()> {
        if let Some(storage) = self.storage.take() {
            if let Storage::File { mmap, .. } = &storage {
                mmap.flush()?;
            }
        }
        Ok(())
    }

    pub fn fill(&mut self, value: T) -> Result<()> {
        for chunk in self.data_mut()?.chunks_exact_mut(T::SIZE) {
            value.write_le(chunk);
        }
        Ok(())
    }

    pub fn transpose(&self) -> Transposed<'_, T> {
        Transposed::new(self)
    }

    pub fn transpose_mut(&mut self) -> TransposedMut<'_, T> {
        TransposedMut::new(self)
    }

    pub fn row(&self, i0: usize) -> Result<Row<'_, T>> {
        self.ensure_open()?;
        check_index(i0, self.size0)?;
        let row_len = self.size1 * T::SIZE;
        let start = i0 * row_len;
        Ok(Row::new(&self.data()?[start..start + row_len]))
    }

    pub fn row_mut(&mut self, i0: usize) -> Result<RowMut<'_, T>> {
        self.ensure_open()?;
        check_index(i0, self.size0)?;
        let row_len = self.size1 * T::SIZE;
        let start = i0 * row_len;
        Ok(RowMut::new(&mut self.data_mut()?[start..start + row_len]))
    }

    pub fn rows(&self) -> Result<impl Iterator<Item = Row<'_, T>>> {
        let row_len = self.size1 * T::SIZE;
        Ok(self.data()?.chunks_exact(row_len).map(Row::new))
    }

    /// Hands out every row as a disjoint mutable slice for rayon workers.
    pub fn par_rows_mut(&mut self) -> Result<impl IndexedParallelIterator<Item = RowMut<'_, T>>> {
        let row_len = self.size1 * T::SIZE;
        Ok(self.data_mut()?.par_chunks_exact_mut(row_len).map(RowMut::new))
    }

    fn ensure_open(&self) -> Result<()> {
        match self.storage {
            Some(_) => Ok(()),
            None => Err(Error::Disposed("dense array")),
        }
    }

    fn data(&self) -> Result<&[u8]> {
        let storage = self.storage.as_ref().ok_or(Error::Disposed("dense array"))?;
        Ok(&storage.mmap()[self.data_offset..self.data_offset + self.data_len])
    }

    fn data_mut(&mut self) -> Result<&mut [u8]> {
        let (offset, len) = (self.data_offset, self.data_len);
        let storage = self.storage.as_mut().ok_or(Error::Disposed("dense array"))?;
        Ok(&mut storage.mmap_mut()[offset..offset + len])
    }

    fn linear_offset(&self, index: usize) -> Result<usize> {
        if self.size0 > 1 && self.size1 > 1 {
            return Err(Error::NotOneDimensional {
                size0: self.size0,
                size1: self.size1,
            });
        }
        check_index(index, self.num_elements())?;
        Ok(index * T::SIZE)
    }

    fn offset_at(&self, i0: usize, i1: usize) -> Result<usize> {
        check_index(i0, self.size0)?;
        check_index(i1, self.size1)?;
        Ok((i0 * self.size1 + i1) * T::SIZE)
    }
}

impl<T: Element> ArrayAccess<T> for DenseArray<T> {
    fn size0(&self) -> usize {
        self.size0
    }

    fn size1(&self) -> usize {
        self.size1
    }

    fn get(&self, index: usize) -> Result<T> {
        let data = self.data()?;
        let offset = self.linear_offset(index)?;
        Ok(T::read_le(&data[offset..]))
    }

    fn get_at(&self, i0: usize, i1: usize) -> Result<T> {
        let data = self.data()?;
        let offset = self.offset_at(i0, i1)?;
        Ok(T::read_le(&data[offset..]))
    }
}

impl<T: Element> ArrayAccessMut<T> for DenseArray<T> {
    fn set(&mut self, index: usize, value: T) -> Result<()> {
        self.ensure_open()?;
        let offset = self.linear_offset(index)?;
        value.write_le(&mut self.data_mut()?[offset..]);
        Ok(())
    }

    fn set_at(&mut self, i0: usize, i1: usize, value: T) -> Result<()> {
        self.ensure_open()?;
        let offset = self.offset_at(i0, i1)?;
        value.write_le(&mut self.data_mut()?[offset..]);
        Ok(())
    }
}

impl<T: Element> std::fmt::Debug for DenseArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseArray")
            .field("size0", &self.size0)
            .field("size1", &self.size1)
            .field("path", &self.path())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Read-only view of one array row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a, T: Element> {
    bytes: &'a [u8],
    _marker: PhantomData<T>,
}

impl<'a, T: Element> Row<'a, T> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / T::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<T> {
        check_index(index, self.len())?;
        Ok(T::read_le(&self.bytes[index * T::SIZE..]))
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + 'a {
        self.bytes.chunks_exact(T::SIZE).map(T::read_le)
    }
}

/// Mutable view of one array row; rows handed out by
/// [`DenseArray::par_rows_mut`] never overlap.
#[derive(Debug)]
pub struct RowMut<'a, T: Element> {
    bytes: &'a mut [u8],
    _marker: PhantomData<T>,
}

impl<'a, T: Element> RowMut<'a, T> {
    fn new(bytes: &'a mut [u8]) -> Self {
        Self {
            bytes,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / T::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<T> {
        check_index(index, self.len())?;
        Ok(T::read_le(&self.bytes[index * T::SIZE..]))
    }

    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        check_index(index, self.len())?;
        value.write_le(&mut self.bytes[index * T::SIZE..]);
        Ok(())
    }

    /// Adds `value` to the element at `index`.
    pub fn add(&mut self, index: usize, value: T) -> Result<()> {
        let current = self.get(index)?;
        self.set(index, current + value)
    }

    pub fn fill(&mut self, value: T) {
        for chunk in self.bytes.chunks_exact_mut(T::SIZE) {
            value.write_le(chunk);
        }
    }
}

fn validate_dimensions(size0: usize, size1: usize) -> Result<()> {
    if size0 == 0 {
        return Err(Error::argument("size0 must be positive"));
    }
    if size1 == 0 {
        return Err(Error::argument("size1 must be positive"));
    }
    Ok(())
}

#[inline]
fn check_index(index: usize, bound: usize) -> Result<()> {
    if index >= bound {
        return Err(Error::OutOfRange { index, bound });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_dimensions_and_count() {
        let array = DenseArray::<f64>::new(3, 5).unwrap();
        assert_eq!(array.size0(), 3);
        assert_eq!(array.size1(), 5);
        assert_eq!(array.num_elements(), 15);

        let array = DenseArray::<i32>::new_1d(7).unwrap();
        assert_eq!(array.size0(), 1);
        assert_eq!(array.size1(), 7);
        assert_eq!(array.num_elements(), 7);
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(DenseArray::<f64>::new(0, 3).unwrap_err().is_argument());
        assert!(DenseArray::<f64>::new(3, 0).unwrap_err().is_argument());
        assert!(DenseArray::<f64>::new(usize::MAX, 2).unwrap_err().is_argument());
    }

    #[test]
    fn test_new_array_is_zeroed() {
        let array = DenseArray::<f64>::new(4, 4).unwrap();
        for i in 0..4 {
            for j in 0..4 {
                assert_eq!(array.get_at(i, j).unwrap(), 0.0);
            }
        }
    }

    #[test]
    fn test_one_dimensional_access() {
        let mut array = DenseArray::<i64>::new_1d(10).unwrap();
        for i in 0..10 {
            array.set(i, (i as i64) * 1_000_000_007).unwrap();
        }
        for i in 0..10 {
            assert_eq!(array.get(i).unwrap(), (i as i64) * 1_000_000_007);
        }
        assert!(array.get(10).unwrap_err().is_out_of_range());
        assert!(array.set(10, 1).unwrap_err().is_out_of_range());

        // column vectors are one-dimensional too
        let mut column = DenseArray::<i32>::new(4, 1).unwrap();
        column.set(3, 42).unwrap();
        assert_eq!(column.get_at(3, 0).unwrap(), 42);
    }

    #[test]
    fn test_single_index_on_matrix_fails() {
        let mut array = DenseArray::<f64>::new(2, 3).unwrap();
        assert!(matches!(
            array.get(0).unwrap_err(),
            Error::NotOneDimensional { size0: 2, size1: 3 }
        ));
        assert!(array.set(0, 1.0).unwrap_err().is_out_of_range());
    }

    #[test]
    fn test_two_dimensional_access() {
        let mut array = DenseArray::<f64>::new(3, 4).unwrap();
        for i in 0..3 {
            for j in 0..4 {
                array.set_at(i, j, (i * 10 + j) as f64).unwrap();
            }
        }
        for i in 0..3 {
            for j in 0..4 {
                assert_eq!(array.get_at(i, j).unwrap(), (i * 10 + j) as f64);
            }
        }

        assert!(array.get_at(3, 0).unwrap_err().is_out_of_range());
        assert!(array.get_at(0, 4).unwrap_err().is_out_of_range());
        assert!(array.set_at(5, 5, 1.0).unwrap_err().is_out_of_range());
        assert_eq!(array.get_at(2, 3).unwrap(), 23.0);
    }

    #[test]
    fn test_row_major_layout() {
        let mut array = DenseArray::<i32>::new(2, 3).unwrap();
        array.set_at(1, 0, 7).unwrap();
        let data = array.data().unwrap();
        assert_eq!(i32::read_le(&data[3 * 4..]), 7);
    }

    #[test]
    fn test_rows() {
        let mut array = DenseArray::<f64>::new(2, 3).unwrap();
        {
            let mut row = array.row_mut(1).unwrap();
            row.set(2, 5.0).unwrap();
            row.add(2, 1.5).unwrap();
            assert!(row.set(3, 1.0).unwrap_err().is_out_of_range());
        }
        assert_eq!(array.get_at(1, 2).unwrap(), 6.5);

        let row = array.row(1).unwrap();
        assert_eq!(row.len(), 3);
        assert_eq!(row.iter().collect::<Vec<_>>(), vec![0.0, 0.0, 6.5]);
        assert!(array.row(2).unwrap_err().is_out_of_range());
        assert_eq!(array.rows().unwrap().count(), 2);
    }

    #[test]
    fn test_par_rows_mut_writes_disjoint_rows() {
        let mut array = DenseArray::<f64>::new(64, 8).unwrap();
        array
            .par_rows_mut()
            .unwrap()
            .enumerate()
            .try_for_each(|(i, mut row)| -> Result<()> {
                for j in 0..row.len() {
                    row.set(j, (i * 8 + j) as f64)?;
                }
                Ok(())
            })
            .unwrap();

        for i in 0..64 {
            for j in 0..8 {
                assert_eq!(array.get_at(i, j).unwrap(), (i * 8 + j) as f64);
            }
        }
    }

    #[test]
    fn test_fill() {
        let mut array = DenseArray::<f64>::new(3, 3).unwrap();
        array.fill(2.5).unwrap();
        assert!(array.rows().unwrap().all(|row| row.iter().all(|v| v == 2.5)));
    }

    #[test]
    fn test_ndarray_conversion() {
        let source = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let dense = DenseArray::from_array2(source.view()).unwrap();
        assert_eq!(dense.size0(), 2);
        assert_eq!(dense.size1(), 3);
        assert_eq!(dense.get_at(1, 2).unwrap(), 6.0);

        let back = dense.to_array2().unwrap();
        assert_eq!(back, source);
        assert_relative_eq!(back.sum(), 21.0);
    }

    #[test]
    fn test_close_is_idempotent_and_disposes() {
        let mut array = DenseArray::<f64>::new(2, 2).unwrap();
        array.close().unwrap();
        array.close().unwrap();
        assert!(array.is_closed());

        assert!(array.get_at(0, 0).unwrap_err().is_disposed());
        assert!(array.get_at(0, 0).unwrap_err().is_disposed());
        assert!(array.set_at(0, 0, 1.0).unwrap_err().is_disposed());
        assert!(array.row(0).unwrap_err().is_disposed());
        assert!(array.to_array2().unwrap_err().is_disposed());
    }

    #[test]
    fn test_file_backed_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.bin");

        {
            let mut array = DenseArray::<f64>::create(&path, 3, 2).unwrap();
            assert_eq!(array.path(), Some(path.as_path()));
            for i in 0..3 {
                for j in 0..2 {
                    array.set_at(i, j, i as f64 - j as f64 * 0.5).unwrap();
                }
            }
            array.close().unwrap();
        }

        let file_len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(file_len, (HEADER_SIZE + 3 * 2 * 8) as u64);

        let array = DenseArray::<f64>::open(&path).unwrap();
        assert_eq!(array.size0(), 3);
        assert_eq!(array.size1(), 2);
        for i in 0..3 {
            for j in 0..2 {
                assert_eq!(array.get_at(i, j).unwrap(), i as f64 - j as f64 * 0.5);
            }
        }
    }

    #[test]
    fn test_open_rejects_bad_files() {
        let dir = tempfile::tempdir().unwrap();

        let short = dir.path().join("short.bin");
        std::fs::write(&short, [0u8; 5]).unwrap();
        assert!(DenseArray::<f64>::open(&short).unwrap_err().is_format());

        let negative = dir.path().join("negative.bin");
        std::fs::write(&negative, ArrayHeader::for_element::<f64>(-2, 3).encode()).unwrap();
        assert!(DenseArray::<f64>::open(&negative).unwrap_err().is_format());

        let truncated = dir.path().join("truncated.bin");
        std::fs::write(&truncated, ArrayHeader::for_element::<f64>(2, 2).encode()).unwrap();
        assert!(DenseArray::<f64>::open(&truncated).unwrap_err().is_format());

        let wrong_type = dir.path().join("wrong_type.bin");
        DenseArray::<i32>::create(&wrong_type, 2, 2).unwrap();
        assert!(DenseArray::<f64>::open(&wrong_type).unwrap_err().is_format());
        assert!(DenseArray::<i32>::open(&wrong_type).is_ok());
    }
}
