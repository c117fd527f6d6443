use nfe_core::AppError;

/// Longest identifier PostgreSQL keeps without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Table and column names of the history table.
///
/// Names are spliced into SQL text, so every one of them is checked by
/// [`validate_identifier`] before a layout can be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    table: String,
    autorizador: String,
    status_json: String,
    valid_from: String,
    valid_to: String,
    is_current: String,
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            table: "disponibilidade".into(),
            autorizador: "autorizador".into(),
            status_json: "status_json".into(),
            valid_from: "valid_from".into(),
            valid_to: "valid_to".into(),
            is_current: "is_current".into(),
        }
    }
}

impl TableLayout {
    pub fn new(
        table: &str,
        autorizador: &str,
        status_json: &str,
        valid_from: &str,
        valid_to: &str,
        is_current: &str,
    ) -> Result<Self, AppError> {
        let layout = Self {
            table: table.to_string(),
            autorizador: autorizador.to_string(),
            status_json: status_json.to_string(),
            valid_from: valid_from.to_string(),
            valid_to: valid_to.to_string(),
            is_current: is_current.to_string(),
        };
        for name in [
            &layout.table,
            &layout.autorizador,
            &layout.status_json,
            &layout.valid_from,
            &layout.valid_to,
            &layout.is_current,
        ] {
            validate_identifier(name)?;
        }
        Ok(layout)
    }

    /// `NFE_TABLE_NAME`, `NFE_FIELD_AUTORIZADOR`, `NFE_FIELD_STATUS_JSON`,
    /// `NFE_FIELD_VALID_FROM`, `NFE_FIELD_VALID_TO`, `NFE_FIELD_IS_CURRENT`.
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let d = Self::default();
        let get = |key: &str, fallback: &str| lookup(key).unwrap_or_else(|| fallback.to_string());
        Self::new(
            &get("NFE_TABLE_NAME", &d.table),
            &get("NFE_FIELD_AUTORIZADOR", &d.autorizador),
            &get("NFE_FIELD_STATUS_JSON", &d.status_json),
            &get("NFE_FIELD_VALID_FROM", &d.valid_from),
            &get("NFE_FIELD_VALID_TO", &d.valid_to),
            &get("NFE_FIELD_IS_CURRENT", &d.is_current),
        )
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Idempotent DDL, one statement per entry.
    pub fn create_statements(&self) -> Vec<String> {
        let Self {
            table: t,
            autorizador: a,
            status_json: s,
            valid_from: vf,
            valid_to: vt,
            is_current: c,
        } = self;
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {t} (
                    id BIGSERIAL PRIMARY KEY,
                    {a} TEXT NOT NULL,
                    {s} TEXT NOT NULL,
                    {vf} TIMESTAMPTZ NOT NULL,
                    {vt} TIMESTAMPTZ NULL,
                    {c} INTEGER NOT NULL DEFAULT 1
                )"
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_{t}_{a} ON {t} ({a})"),
            format!("CREATE INDEX IF NOT EXISTS idx_{t}_{vf} ON {t} ({vf})"),
        ]
    }

    /// Projection with the canonical column aliases read by the repository.
    fn projection(&self) -> String {
        format!(
            "id, {} AS autorizador, {} AS status_json, {} AS valid_from, {} AS valid_to, {} AS is_current",
            self.autorizador, self.status_json, self.valid_from, self.valid_to, self.is_current
        )
    }

    /// `$1` = autorizador.
    pub fn select_current_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = $1 AND {} = 1 ORDER BY {} DESC LIMIT 1",
            self.projection(),
            self.table,
            self.autorizador,
            self.is_current,
            self.valid_from
        )
    }

    /// `$1` = autorizador, `$2` = limit.
    pub fn select_history_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = $1 ORDER BY {} DESC, id DESC LIMIT $2",
            self.projection(),
            self.table,
            self.autorizador,
            self.valid_from
        )
    }

    pub fn select_all_current_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = 1 ORDER BY {}",
            self.projection(),
            self.table,
            self.is_current,
            self.autorizador
        )
    }

    /// `$1` = valid_to, `$2` = id.
    pub fn close_sql(&self) -> String {
        format!(
            "UPDATE {} SET {} = $1, {} = 0 WHERE id = $2",
            self.table, self.valid_to, self.is_current
        )
    }

    /// `$1` = autorizador, `$2` = status_json, `$3` = valid_from.
    pub fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} ({}, {}, {}, {}, {}) VALUES ($1, $2, $3, NULL, 1)",
            self.table,
            self.autorizador,
            self.status_json,
            self.valid_from,
            self.valid_to,
            self.is_current
        )
    }

    /// `$1` = cutoff. Current records never match.
    pub fn prune_sql(&self) -> String {
        format!(
            "DELETE FROM {} WHERE {} = 0 AND {} IS NOT NULL AND {} < $1",
            self.table, self.is_current, self.valid_to, self.valid_to
        )
    }
}

/// Accept plain unquoted SQL identifiers: a letter or underscore followed
/// by ASCII letters, digits or underscores.
pub fn validate_identifier(name: &str) -> Result<(), AppError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid_start || !valid_rest {
        return Err(AppError::ConfigError(format!(
            "Invalid SQL identifier '{name}'"
        )));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(AppError::ConfigError(format!(
            "SQL identifier '{name}' is longer than {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    Ok(())
}
