use crate::db::{quote_ident, ColumnInfo, Row};
use serde::{Deserialize, Serialize};

/// Column-name fragments that mark a column as holding place names.
pub const LOCATION_KEYWORDS: &[&str] = &[
    "city", "province", "region", "location", "城市", "省", "地区", "区域",
];

const TEXT_TYPE_MARKERS: &[&str] = &["VARCHAR", "TEXT", "CHAR"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableDescriptor {
    /// Render as a `CREATE TABLE` statement.
    pub fn to_ddl(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|col| {
                let mut parts = vec![quote_ident(&col.name), col.data_type.clone()];
                if !col.is_nullable {
                    parts.push("NOT NULL".into());
                }
                if let Some(default) = col.column_default.as_deref().filter(|d| !d.is_empty()) {
                    parts.push(format!("DEFAULT {}", default));
                }
                parts.join(" ")
            })
            .collect();

        format!(
            "CREATE TABLE {} (\n  {}\n);",
            quote_ident(&self.name),
            columns.join(",\n  ")
        )
    }

    /// Text columns whose values are worth listing for fuzzy matching.
    pub fn location_text_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| is_location_text_column(c))
    }
}

/// Schema context sent to the model, one descriptor per table that could be described.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaContext {
    pub tables: Vec<TableDescriptor>,
}

impl SchemaContext {
    pub fn ddl_statements(&self) -> Vec<String> {
        self.tables.iter().map(TableDescriptor::to_ddl).collect()
    }
}

pub fn is_text_type(data_type: &str) -> bool {
    let upper = data_type.to_uppercase();
    TEXT_TYPE_MARKERS.iter().any(|m| upper.contains(m))
}

pub fn is_location_column(name: &str) -> bool {
    let lower = name.to_lowercase();
    LOCATION_KEYWORDS.iter().any(|k| lower.contains(k))
}

pub fn is_location_text_column(col: &ColumnInfo) -> bool {
    is_text_type(&col.data_type) && is_location_column(&col.name)
}

pub type SampleRow = Row;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistinctValueSet {
    pub table: String,
    pub column: String,
    pub values: Vec<String>,
}

/// Grounding data for one table: a few rows plus the distinct location values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSample {
    pub table: String,
    pub rows: Vec<SampleRow>,
    pub distinct_values: Vec<DistinctValueSet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSql {
    pub question: String,
    pub sql: String,
}

/// Everything the prompt is built from. Built fresh for every question.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub dialect: String,
    pub ddl_statements: Vec<String>,
    pub samples: Vec<TableSample>,
    /// Reserved for example-based prompting; nothing fills it yet.
    pub examples: Vec<QuestionSql>,
    /// Reserved for free-text documentation; nothing fills it yet.
    pub documentation: Vec<String>,
    pub question: String,
}
