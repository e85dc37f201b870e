mod row;

pub(crate) use row::column_index;
pub use row::Row;
