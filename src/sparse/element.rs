use crate::error::{Error, Result};
use crate::utils::Element;

use super::SparseVector;

/// A single `(row, column, value)` triple with 0-based indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatrixElement<T: Element> {
    pub row: usize,
    pub column: usize,
    pub value: T,
}

impl<T: Element> MatrixElement<T> {
    pub fn new(row: usize, column: usize, value: T) -> Self {
        Self { row, column, value }
    }
}

/// Folds a row-ordered stream of matrix elements into exactly `rows_count`
/// sparse rows, emitting empty rows for every gap.
///
/// The first invalid element (index out of bounds, row going backwards, more
/// elements than declared) is yielded as an error and ends the sequence.
pub(crate) struct OrderedRows<T: Element, I> {
    elements: I,
    rows_count: usize,
    columns_count: usize,
    elements_count: u64,
    seen: u64,
    next_row: usize,
    current: Option<(usize, SparseVector<T>)>,
    exhausted: bool,
    failed: bool,
}

impl<T, I> OrderedRows<T, I>
where
    T: Element,
    I: Iterator<Item = Result<MatrixElement<T>>>,
{
    pub fn new(elements: I, rows_count: usize, columns_count: usize, elements_count: u64) -> Self {
        Self {
            elements,
            rows_count,
            columns_count,
            elements_count,
            seen: 0,
            next_row: 0,
            current: None,
            exhausted: false,
            failed: false,
        }
    }

    fn validate(&mut self, element: &MatrixElement<T>) -> Result<()> {
        if element.row >= self.rows_count {
            return Err(Error::format(format!(
                "row index {} exceeds the declared rows count {}",
                element.row + 1,
                self.rows_count
            )));
        }
        if element.column >= self.columns_count {
            return Err(Error::format(format!(
                "column index {} exceeds the declared columns count {}",
                element.column + 1,
                self.columns_count
            )));
        }
        self.seen += 1;
        if self.seen > self.elements_count {
            return Err(Error::format(format!(
                "more than the declared {} elements",
                self.elements_count
            )));
        }
        if let Some((row, _)) = &self.current {
            if element.row < *row {
                return Err(Error::format(format!(
                    "row {} listed after row {}; entries must be grouped by ascending row",
                    element.row + 1,
                    row + 1
                )));
            }
        }
        Ok(())
    }

    fn fail(&mut self, error: Error) -> Option<Result<SparseVector<T>>> {
        self.failed = true;
        self.current = None;
        Some(Err(error))
    }
}

impl<T, I> Iterator for OrderedRows<T, I>
where
    T: Element,
    I: Iterator<Item = Result<MatrixElement<T>>>,
{
    type Item = Result<SparseVector<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            match &self.current {
                Some((row, _)) if self.next_row < *row => {
                    self.next_row += 1;
                    return Some(Ok(SparseVector::new()));
                }
                None if self.exhausted => {
                    if self.next_row < self.rows_count {
                        self.next_row += 1;
                        return Some(Ok(SparseVector::new()));
                    }
                    return None;
                }
                _ => {}
            }

            if self.exhausted {
                if let Some((_, vector)) = self.current.take() {
                    self.next_row += 1;
                    return Some(Ok(vector));
                }
                continue;
            }

            let element = match self.elements.next() {
                None => {
                    self.exhausted = true;
                    continue;
                }
                Some(Err(error)) => return self.fail(error),
                Some(Ok(element)) => element,
            };
            if let Err(error) = self.validate(&element) {
                return self.fail(error);
            }

            match &mut self.current {
                Some((row, vector)) if *row == element.row => {
                    vector.insert(element.column, element.value);
                }
                _ => {
                    let mut vector = SparseVector::new();
                    vector.insert(element.column, element.value);
                    if let Some((_, finished)) = self.current.replace((element.row, vector)) {
                        self.next_row += 1;
                        return Some(Ok(finished));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows_from(
        elements: Vec<(usize, usize, f64)>,
        rows: usize,
        columns: usize,
        count: u64,
    ) -> Vec<Result<SparseVector<f64>>> {
        let elements = elements
            .into_iter()
            .map(|(r, c, v)| Ok::<_, Error>(MatrixElement::new(r, c, v)));
        OrderedRows::new(elements, rows, columns, count).collect()
    }

    #[test]
    fn test_rows_are_grouped() {
        let rows = rows_from(
            vec![(0, 0, 22.0), (0, 1, 28.0), (1, 0, 49.0), (1, 1, 64.0)],
            2,
            2,
            4,
        );
        let rows: Vec<_> = rows.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            rows,
            vec![
                SparseVector::from([(0, 22.0), (1, 28.0)]),
                SparseVector::from([(0, 49.0), (1, 64.0)]),
            ]
        );
    }

    #[test]
    fn test_gaps_become_empty_rows() {
        let rows = rows_from(vec![(1, 2, 1.0), (4, 0, 2.0)], 6, 3, 2);
        let rows: Vec<_> = rows.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 6);
        assert!(rows[0].is_empty());
        assert_eq!(rows[1], SparseVector::from([(2, 1.0)]));
        assert!(rows[2].is_empty());
        assert!(rows[3].is_empty());
        assert_eq!(rows[4], SparseVector::from([(0, 2.0)]));
        assert!(rows[5].is_empty());
    }

    #[test]
    fn test_no_elements_yields_empty_rows() {
        let rows = rows_from(vec![], 3, 3, 0);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.as_ref().unwrap().is_empty()));

        assert!(rows_from(vec![], 0, 0, 0).is_empty());
    }

    #[test]
    fn test_row_out_of_range_aborts() {
        let rows = rows_from(vec![(0, 0, 1.0), (2, 0, 1.0)], 2, 1, 2);
        // row 0 is still open when the bad element arrives, so it is dropped
        assert_eq!(rows.len(), 1);
        assert!(rows[0].as_ref().unwrap_err().is_format());
    }

    #[test]
    fn test_column_out_of_range_aborts() {
        let rows = rows_from(vec![(0, 3, 1.0)], 1, 3, 1);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].as_ref().unwrap_err().is_format());
    }

    #[test]
    fn test_too_many_elements_aborts() {
        let rows = rows_from(vec![(0, 0, 1.0), (0, 1, 1.0)], 1, 2, 1);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].as_ref().unwrap_err().is_format());
    }

    #[test]
    fn test_descending_rows_abort() {
        let rows = rows_from(vec![(2, 0, 1.0), (1, 0, 1.0)], 3, 1, 2);
        // rows 0 and 1 are emitted as gaps before the offending element is read
        assert_eq!(rows.len(), 3);
        assert!(rows[2].as_ref().unwrap_err().is_format());
    }

    #[test]
    fn test_upstream_error_is_forwarded_once() {
        let elements = vec![
            Ok(MatrixElement::new(0, 0, 1.0)),
            Err(Error::format("broken line")),
            Ok(MatrixElement::new(1, 0, 1.0)),
        ];
        let mut rows = OrderedRows::new(elements.into_iter(), 2, 1, 2);
        assert!(rows.next().unwrap().unwrap_err().is_format());
        assert!(rows.next().is_none());
    }
}
