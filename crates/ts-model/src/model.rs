//! Field and model definitions and the SQL derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_common::MonthKey;

/// Number of audit columns every model starts with.
pub const AUDIT_FIELD_COUNT: usize = 4;

/// Physical table layout of a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sharding {
    /// One table named after the model.
    #[default]
    #[serde(alias = "")]
    None,
    /// One table per calendar month, `<name>_<YYYYMM>`.
    Month,
}

impl fmt::Display for Sharding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sharding::None => write!(f, "none"),
            Sharding::Month => write!(f, "month"),
        }
    }
}

/// One column of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub sql_type: String,
    pub comment: String,
    pub indexed: bool,
}

impl FieldDefinition {
    pub fn new(name: &str, sql_type: &str, comment: &str, indexed: bool) -> Self {
        Self {
            name: name.to_string(),
            sql_type: sql_type.to_string(),
            comment: comment.to_string(),
            indexed,
        }
    }

    /// Whether the column stores text (and therefore defaults to `''`).
    pub fn is_varchar(&self) -> bool {
        self.sql_type
            .trim_start()
            .to_ascii_lowercase()
            .starts_with("varchar")
    }

    /// Column definition used by CREATE TABLE and ADD COLUMN.
    pub fn column_sql(&self) -> String {
        let default = if self.is_varchar() { "''" } else { "'0'" };
        format!(
            "`{}` {} NOT NULL DEFAULT {} COMMENT '{}'",
            self.name,
            self.sql_type,
            default,
            escape_literal(&self.comment)
        )
    }

    /// Name of the secondary index created for an indexed field.
    pub fn index_name(&self) -> String {
        format!("i_{}", self.name)
    }

    pub fn add_column_sql(&self, table: &str) -> String {
        format!("ALTER TABLE `{}` ADD COLUMN {}", table, self.column_sql())
    }

    pub fn add_index_sql(&self, table: &str) -> String {
        format!(
            "ALTER TABLE `{}` ADD INDEX `{}`(`{}`)",
            table,
            self.index_name(),
            self.name
        )
    }
}

/// `ALTER TABLE … DROP COLUMN` for a live column the model no longer has.
pub fn drop_column_sql(table: &str, column: &str) -> String {
    format!("ALTER TABLE `{}` DROP COLUMN `{}`", table, column)
}

/// The fixed columns prepended to every model, in order.
pub fn audit_fields() -> [FieldDefinition; AUDIT_FIELD_COUNT] {
    [
        FieldDefinition::new("version", "int", "model version", false),
        FieldDefinition::new("logtime", "int", "log time", true),
        FieldDefinition::new("createtime", "int", "create time", false),
        FieldDefinition::new("updatetime", "int", "update time", false),
    ]
}

/// A versioned model with its derived SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDefinition {
    name: String,
    version: i32,
    sharding: Sharding,
    comment: String,
    fields: Vec<FieldDefinition>,
    field_list_sql: String,
    versioned_name: String,
}

impl ModelDefinition {
    /// Build a model from its declared fields. Audit fields are prepended;
    /// uniqueness is checked by the registry, not here.
    pub fn new(
        name: &str,
        version: i32,
        sharding: Sharding,
        comment: &str,
        declared: Vec<FieldDefinition>,
    ) -> Self {
        let mut fields = Vec::with_capacity(AUDIT_FIELD_COUNT + declared.len());
        fields.extend(audit_fields());
        fields.extend(declared);

        let field_list_sql = format!(
            "({})",
            fields
                .iter()
                .map(|f| f.name.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );

        Self {
            name: name.to_string(),
            version,
            sharding,
            comment: comment.to_string(),
            fields,
            field_list_sql,
            versioned_name: format!("{}v{}", name, version),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn sharding(&self) -> Sharding {
        self.sharding
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Audit fields followed by declared fields.
    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn declared_fields(&self) -> &[FieldDefinition] {
        &self.fields[AUDIT_FIELD_COUNT..]
    }

    pub fn declared_field_count(&self) -> usize {
        self.fields.len() - AUDIT_FIELD_COUNT
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// `(version,logtime,createtime,updatetime,...)`
    pub fn field_list_sql(&self) -> &str {
        &self.field_list_sql
    }

    /// `name + "v" + version`
    pub fn versioned_name(&self) -> &str {
        &self.versioned_name
    }

    /// Physical table holding records of `month`.
    pub fn table_name(&self, month: MonthKey) -> String {
        let base = self.name.to_ascii_lowercase();
        match self.sharding {
            Sharding::None => base,
            Sharding::Month => format!("{}_{}", base, month),
        }
    }

    /// CREATE TABLE statement for `table`.
    pub fn create_table_sql(&self, table: &str) -> String {
        let mut sql = format!("CREATE TABLE `{}` (\n", table);
        sql.push_str("\t`id` bigint(11) AUTO_INCREMENT COMMENT 'id',\n");
        for field in &self.fields {
            sql.push('\t');
            sql.push_str(&field.column_sql());
            sql.push_str(",\n");
        }
        sql.push_str("\tPRIMARY KEY (`id`)\n");
        sql.push_str(&format!(
            ") ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 ROW_FORMAT=COMPACT COMMENT='{}';",
            escape_literal(&self.comment)
        ));
        sql
    }

    /// ADD INDEX statements for every indexed field, in field order.
    pub fn add_index_sqls(&self, table: &str) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.indexed)
            .map(|f| f.add_index_sql(table))
            .collect()
    }
}

fn escape_literal(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "''")
}
