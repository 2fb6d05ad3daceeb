//! Declarative table definitions.

use crrow_core::{ColumnDescription, TableDescription};

/// Builds a [`TableDescription`] column by column.
///
/// Key columns added with [`TableBuilder::pk`] take key positions in call
/// order; [`TableBuilder::pk_at`] places a column at an explicit position so a
/// composite key can be declared in a different order than its columns.
#[derive(Clone, Debug)]
pub struct TableBuilder {
    name: String,
    columns: Vec<ColumnDescription>,
    next_pk: u32,
}

impl TableBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        TableBuilder {
            name: name.into(),
            columns: Vec::new(),
            next_pk: 1,
        }
    }

    pub fn pk(mut self, name: impl Into<String>, decl_type: impl Into<String>) -> Self {
        let position = self.next_pk;
        self.push(name.into(), decl_type.into(), true, position);
        self.next_pk += 1;
        self
    }

    pub fn pk_at(
        mut self,
        name: impl Into<String>,
        decl_type: impl Into<String>,
        position: u32,
    ) -> Self {
        self.push(name.into(), decl_type.into(), true, position);
        self.next_pk = self.next_pk.max(position + 1);
        self
    }

    pub fn column(mut self, name: impl Into<String>, decl_type: impl Into<String>) -> Self {
        self.push(name.into(), decl_type.into(), false, 0);
        self
    }

    pub fn not_null(mut self, name: impl Into<String>, decl_type: impl Into<String>) -> Self {
        self.push(name.into(), decl_type.into(), true, 0);
        self
    }

    pub fn build(self) -> TableDescription {
        TableDescription {
            name: self.name,
            columns: self.columns,
        }
    }

    fn push(&mut self, name: String, decl_type: String, not_null: bool, pk_position: u32) {
        self.columns.push(ColumnDescription {
            cid: self.columns.len() as i64,
            name,
            decl_type,
            not_null,
            pk_position,
        });
    }
}
