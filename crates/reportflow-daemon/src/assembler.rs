//! Default [`DocumentAssembler`]: plain `{{name}}` text substitution with no
//! `.docx` container.
//!
//! The pipeline core is deliberately renderer-agnostic (see
//! `reportflow::collaborators::DocumentAssembler`'s doc comment) and this
//! corpus carries no Word-document-writing crate; wiring a real DOCX
//! renderer here would mean depending on one at the binary boundary for a
//! format this workspace never otherwise touches. This assembler satisfies
//! the trait contract — substitution, and a friendly name on every exit path
//! — without pretending to produce a `.docx` file.

use std::collections::HashMap;

use async_trait::async_trait;
use reportflow::collaborators::{AssembleOptions, AssembledDocument, DocumentAssembler};
use reportflow::error::{Error, Result};
use tracing::debug;

/// Treats `template_ref` as the template body itself and substitutes
/// `{{name}}` tokens from `render_map`.
pub struct PlainTextAssembler;

#[async_trait]
impl DocumentAssembler for PlainTextAssembler {
    async fn assemble(
        &self,
        template_ref: &str,
        render_map: &HashMap<String, serde_json::Value>,
        _options: &AssembleOptions,
    ) -> Result<AssembledDocument> {
        if template_ref.is_empty() {
            return Err(Error::Assembly("template reference was empty".to_string()));
        }

        let mut rendered = template_ref.to_string();
        for (name, value) in render_map {
            let token = format!("{{{{{name}}}}}");
            let replacement = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&token, &replacement);
        }

        debug!(substitutions = render_map.len(), "assembled plain-text document");
        Ok(AssembledDocument {
            bytes: rendered.into_bytes(),
            friendly_name: "report.txt".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn substitutes_tokens_present_in_the_template() {
        let assembler = PlainTextAssembler;
        let mut render_map = HashMap::new();
        render_map.insert("total_sales".to_string(), serde_json::json!(1234));

        let doc = assembler
            .assemble("Total sales: {{total_sales}}", &render_map, &AssembleOptions::default())
            .await
            .unwrap();

        assert_eq!(String::from_utf8(doc.bytes).unwrap(), "Total sales: 1234");
    }

    #[tokio::test]
    async fn empty_template_reference_is_an_assembly_error() {
        let assembler = PlainTextAssembler;
        let result = assembler.assemble("", &HashMap::new(), &AssembleOptions::default()).await;
        assert!(matches!(result, Err(Error::Assembly(_))));
    }
}
