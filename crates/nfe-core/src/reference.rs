//! Static reference data joined onto extracted rows.
//!
//! Holds the known autorizadores with the UF lists they serve and the
//! status-image lookup used by the table extractor. Built once at startup
//! and shared read-only (typically behind an `Arc`).

use std::collections::HashMap;

use crate::models::{FieldValue, StatusCode, StatusRow};
use crate::normalize::normalize_key;

/// Key used for the back-reference attached on indirect matches.
pub const RELATED_KEY: &str = "relacionado_a";

/// Static attributes of one autorizador.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutorizadorInfo {
    pub code: String,
    pub tipo: String,
    /// Named UF lists in declaration order (`ufs_autorizador`,
    /// `ufs_consulta_cadastro`, `ufs_contingencia`, ...).
    pub uf_lists: Vec<(String, Vec<String>)>,
}

impl AutorizadorInfo {
    pub fn new(code: impl Into<String>, tipo: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            tipo: tipo.into(),
            uf_lists: Vec::new(),
        }
    }

    pub fn with_ufs(mut self, name: impl Into<String>, ufs: &[&str]) -> Self {
        self.uf_lists
            .push((name.into(), ufs.iter().map(|s| s.to_string()).collect()));
        self
    }

    /// True when any UF list of this entry contains `code`.
    pub fn lists_contain(&self, code: &str) -> bool {
        self.uf_lists
            .iter()
            .any(|(_, ufs)| ufs.iter().any(|uf| uf == code))
    }
}

/// Immutable lookup tables for enrichment and status decoding.
#[derive(Debug, Clone)]
pub struct ReferenceData {
    autorizadores: Vec<AutorizadorInfo>,
    status_images: HashMap<String, StatusCode>,
}

impl ReferenceData {
    pub fn new(
        autorizadores: Vec<AutorizadorInfo>,
        status_images: HashMap<String, StatusCode>,
    ) -> Self {
        Self {
            autorizadores,
            status_images,
        }
    }

    /// The tables published on the national NF-e availability page.
    pub fn builtin() -> Self {
        let autorizadores = vec![
            AutorizadorInfo::new("SVAN", "Sefaz Virtual Ambiente Nacional")
                .with_ufs("ufs_autorizador", &["MA"]),
            AutorizadorInfo::new("SVRS", "Sefaz Virtual Rio Grande do Sul")
                .with_ufs(
                    "ufs_autorizador",
                    &[
                        "AC", "AL", "AP", "CE", "DF", "ES", "PA", "PB", "PI", "RJ", "RN", "RO",
                        "RR", "SC", "SE", "TO",
                    ],
                )
                .with_ufs("ufs_consulta_cadastro", &["AC", "ES", "RN", "PB", "SC"]),
            AutorizadorInfo::new("SVC-AN", "Contingência Nacional").with_ufs(
                "ufs_contingencia",
                &[
                    "AC", "AL", "AP", "CE", "DF", "ES", "MG", "PA", "PB", "PI", "RJ", "RN", "RO",
                    "RR", "RS", "SC", "SE", "SP", "TO",
                ],
            ),
            AutorizadorInfo::new("SVC-RS", "Contingência RS").with_ufs(
                "ufs_contingencia",
                &["AM", "BA", "GO", "MA", "MS", "MT", "PE", "PR"],
            ),
        ];

        let status_images = HashMap::from([
            ("bola_verde_P.png".to_string(), StatusCode::Verde),
            ("bola_amarela_P.png".to_string(), StatusCode::Amarelo),
            ("bola_vermelho_P.png".to_string(), StatusCode::Vermelho),
            ("bola_cinza_P.png".to_string(), StatusCode::Cinza),
        ]);

        Self::new(autorizadores, status_images)
    }

    pub fn autorizadores(&self) -> &[AutorizadorInfo] {
        &self.autorizadores
    }

    pub fn lookup(&self, code: &str) -> Option<&AutorizadorInfo> {
        self.autorizadores.iter().find(|a| a.code == code)
    }

    /// Decode a status image file name (`bola_verde_P.png`).
    ///
    /// Returns `None` for unknown images; callers record those as
    /// [`StatusCode::Desconhecido`].
    pub fn status_for_image(&self, filename: &str) -> Option<StatusCode> {
        self.status_images.get(filename).copied()
    }

    /// Merge metadata for the row's autorizador into `row`.
    ///
    /// Exact code matches contribute `tipo` and every UF list. Otherwise
    /// the first entry whose UF lists contain the code contributes a single
    /// `relacionado_a` field. Rows without a match are left untouched.
    pub fn enrich(&self, row: &mut StatusRow) {
        let Some(code) = row.autorizador().map(str::to_string) else {
            return;
        };

        if let Some(info) = self.lookup(&code) {
            row.insert(normalize_key("tipo"), info.tipo.as_str());
            for (name, ufs) in &info.uf_lists {
                row.insert(normalize_key(name), FieldValue::List(ufs.clone()));
            }
            return;
        }

        if let Some(info) = self.autorizadores.iter().find(|a| a.lists_contain(&code)) {
            tracing::debug!(autorizador = %code, related = %info.code, "Indirect metadata match");
            row.insert(normalize_key(RELATED_KEY), info.code.as_str());
        }
    }
}

impl Default for ReferenceData {
    fn default() -> Self {
        Self::builtin()
    }
}
