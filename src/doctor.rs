use serde::Serialize;
use std::sync::Arc;

use crate::engine::SimilarityEngine;
use crate::language::LangId;

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub version: String,
    pub engines: Vec<EngineStatus>,
    pub languages: Vec<LanguageStatus>,
}

#[derive(Debug, Serialize)]
pub struct EngineStatus {
    pub name: String,
    pub version: String,
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct LanguageStatus {
    pub language: LangId,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parser_version: Option<String>,
}

/// Report the configured engines and verify every tree-sitter grammar loads.
pub fn run_doctor(engines: &[Arc<dyn SimilarityEngine>]) -> DoctorReport {
    let engines = engines
        .iter()
        .map(|engine| EngineStatus {
            name: engine.name().to_string(),
            version: engine.version().to_string(),
            available: engine.is_available(),
        })
        .collect();

    let languages = LangId::ALL
        .iter()
        .map(|&lang| {
            let available = check_language(lang);
            LanguageStatus {
                language: lang,
                available,
                parser_version: if available {
                    Some(lang.ts_language().abi_version().to_string())
                } else {
                    None
                },
            }
        })
        .collect();

    DoctorReport {
        version: env!("CARGO_PKG_VERSION").to_string(),
        engines,
        languages,
    }
}

fn check_language(lang: LangId) -> bool {
    let mut parser = tree_sitter::Parser::new();
    parser.set_language(&lang.ts_language()).is_ok()
}
