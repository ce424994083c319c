use crate::codec::{self, IDENTITY_COLUMN};
use crate::migrate::ColumnInfo;
use tabled::{settings::Style, Table, Tabled};

/// One stored column, with the field kind its prefix encodes
#[derive(Tabled)]
struct ColumnRow {
    #[tabled(rename = "Column")]
    column: String,
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Type")]
    storage: String,
}

impl From<&ColumnInfo> for ColumnRow {
    fn from(info: &ColumnInfo) -> Self {
        let (kind, field) = if info.name.eq_ignore_ascii_case(IDENTITY_COLUMN) {
            ("identity".to_string(), info.name.clone())
        } else {
            let (classification, field) = codec::split_column(&info.name);
            (classification.to_string(), field.to_string())
        };
        Self {
            column: info.name.clone(),
            field,
            kind,
            storage: info.decl_type.clone(),
        }
    }
}

/// Columns of one table; empty when the table has none
pub fn columns_table(columns: &[ColumnInfo]) -> String {
    if columns.is_empty() {
        return String::new();
    }
    let rows: Vec<ColumnRow> = columns.iter().map(ColumnRow::from).collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, decl_type: &str, primary_key: bool) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            decl_type: decl_type.to_string(),
            primary_key,
        }
    }

    #[test]
    fn test_columns_table_decodes_prefixes() {
        let rendered = columns_table(&[
            info("id", "INTEGER", true),
            info("LISTtags", "TEXT", false),
            info("FOREIGNIDowner", "TEXT", false),
        ]);
        let tags = rendered.lines().find(|l| l.contains("LISTtags")).unwrap();
        assert!(tags.contains("tags") && tags.contains("list"));
        let owner = rendered.lines().find(|l| l.contains("FOREIGNIDowner")).unwrap();
        assert!(owner.contains("reference"));
        assert!(rendered.contains("identity"));
        assert!(columns_table(&[]).is_empty());
    }
}
