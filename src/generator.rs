//! Local synthesis of template documents.
//!
//! Used when upstream detail content is unavailable. Section text is chosen
//! from [`KEYWORD_RULES`]: the first rule with a keyword contained in the
//! template's specialty (case-insensitive) wins.

use std::time::Duration;

use futures::future::join_all;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog_types::{GeneratedContent, Template};
use crate::error::CatalogResult;
use crate::store::CatalogStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionText {
    pub procedure: &'static str,
    pub clinical: &'static str,
    pub comparison: &'static str,
    pub findings: &'static str,
    pub impression: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordRule {
    pub label: &'static str,
    /// Lower-case substrings that select this rule.
    pub keywords: &'static [&'static str],
    pub sections: SectionText,
}

/// Evaluation order is significant: anatomy rules precede modality rules.
pub const KEYWORD_RULES: &[KeywordRule] = &[
    KeywordRule {
        label: "chest",
        keywords: &["chest", "lung"],
        sections: SectionText {
            procedure: "PA and lateral views of the chest were obtained.",
            clinical: "Cough, dyspnea or abnormal breath sounds.",
            comparison: "Prior chest imaging, if available.",
            findings: "The lungs are clear without focal consolidation, effusion or pneumothorax. The cardiomediastinal silhouette is within normal limits.",
            impression: "No acute cardiopulmonary abnormality.",
        },
    },
    KeywordRule {
        label: "breast",
        keywords: &["breast"],
        sections: SectionText {
            procedure: "Bilateral breast imaging was performed with standard views.",
            clinical: "Screening or evaluation of a palpable abnormality.",
            comparison: "Prior breast imaging, if available.",
            findings: "The breasts are heterogeneously dense. No suspicious mass, architectural distortion or suspicious calcifications.",
            impression: "BI-RADS 1: Negative.",
        },
    },
    KeywordRule {
        label: "cardiac",
        keywords: &["cardiac"],
        sections: SectionText {
            procedure: "ECG-gated cardiac imaging was performed.",
            clinical: "Chest pain or evaluation of cardiac function.",
            comparison: "Prior cardiac studies, if available.",
            findings: "Cardiac chambers are normal in size. Left ventricular systolic function is preserved. No pericardial effusion.",
            impression: "Normal cardiac morphology and function.",
        },
    },
    KeywordRule {
        label: "neuro",
        keywords: &["neuro"],
        sections: SectionText {
            procedure: "Imaging of the brain was performed per protocol.",
            clinical: "Headache, altered mental status or focal neurologic deficit.",
            comparison: "Prior neuroimaging, if available.",
            findings: "No intracranial hemorrhage, mass effect or midline shift. Gray-white differentiation is preserved. The ventricles are normal in size.",
            impression: "No acute intracranial abnormality.",
        },
    },
    KeywordRule {
        label: "spine",
        keywords: &["spine"],
        sections: SectionText {
            procedure: "Imaging of the spine was performed per protocol.",
            clinical: "Back pain or radiculopathy.",
            comparison: "Prior spine imaging, if available.",
            findings: "Vertebral body heights and alignment are maintained. No significant canal or foraminal stenosis.",
            impression: "No acute osseous abnormality of the spine.",
        },
    },
    KeywordRule {
        label: "abdomen",
        keywords: &["abdomen"],
        sections: SectionText {
            procedure: "Imaging of the abdomen and pelvis was performed.",
            clinical: "Abdominal pain.",
            comparison: "Prior abdominal imaging, if available.",
            findings: "The liver, gallbladder, pancreas, spleen and kidneys are unremarkable. No bowel obstruction or free fluid.",
            impression: "No acute abdominal or pelvic abnormality.",
        },
    },
    KeywordRule {
        label: "musculoskeletal",
        keywords: &["musculoskeletal"],
        sections: SectionText {
            procedure: "Imaging of the affected extremity was performed.",
            clinical: "Pain or trauma.",
            comparison: "Prior imaging of the region, if available.",
            findings: "No acute fracture or dislocation. Joint spaces are preserved. Soft tissues are unremarkable.",
            impression: "No acute osseous abnormality.",
        },
    },
    KeywordRule {
        label: "mri",
        keywords: &["mri"],
        sections: SectionText {
            procedure: "Multiplanar multisequence MR imaging was performed.",
            clinical: "Further characterization of a known finding.",
            comparison: "Prior cross-sectional imaging, if available.",
            findings: "No abnormal signal intensity or pathologic enhancement.",
            impression: "Unremarkable MR examination.",
        },
    },
    KeywordRule {
        label: "ct",
        keywords: &["ct"],
        sections: SectionText {
            procedure: "Axial CT images were obtained with multiplanar reformations.",
            clinical: "Evaluation of the region of interest.",
            comparison: "Prior CT examinations, if available.",
            findings: "No acute abnormality is identified on CT.",
            impression: "Unremarkable CT examination.",
        },
    },
];

pub const GENERIC_SECTIONS: SectionText = SectionText {
    procedure: "The examination was performed per departmental protocol.",
    clinical: "Clinical indication as provided by the referring provider.",
    comparison: "None available.",
    findings: "No significant abnormality is identified.",
    impression: "Normal examination.",
};

/// (first name, last name)
pub const ATTRIBUTION_NAMES: [(&str, &str); 12] = [
    ("Sarah", "Johnson"),
    ("Michael", "Chen"),
    ("Emily", "Rodriguez"),
    ("David", "Kim"),
    ("Jennifer", "Patel"),
    ("Robert", "Williams"),
    ("Lisa", "Thompson"),
    ("James", "Anderson"),
    ("Maria", "Garcia"),
    ("William", "Brown"),
    ("Amanda", "Davis"),
    ("Christopher", "Wilson"),
];

pub fn match_rule(specialty: &str) -> Option<&'static KeywordRule> {
    let specialty = specialty.to_lowercase();
    KEYWORD_RULES
        .iter()
        .find(|rule| rule.keywords.iter().any(|k| specialty.contains(k)))
}

pub fn sections_for(specialty: &str) -> &'static SectionText {
    match_rule(specialty)
        .map(|rule| &rule.sections)
        .unwrap_or(&GENERIC_SECTIONS)
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn render_document(
    title: &str,
    specialty: &str,
    sections: &SectionText,
    document_id: Uuid,
) -> String {
    let title = escape_html(title);
    let specialty = escape_html(specialty);
    let parts = [
        ("procedure", "Procedure Information", sections.procedure),
        ("clinical", "Clinical Information", sections.clinical),
        ("comparison", "Comparisons", sections.comparison),
        ("findings", "Findings", sections.findings),
        ("impression", "Impression", sections.impression),
    ];

    let mut body = String::new();
    for (id, heading, text) in parts {
        body.push_str(&format!(
            "<section id=\"{id}\" data-section-name=\"{heading}\">\n\
             <header class=\"level1\">{heading}</header>\n\
             <p>{}</p>\n\
             </section>\n",
            escape_html(text)
        ));
    }

    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head>\n\
         <meta charset=\"UTF-8\"/>\n\
         <title>{title}</title>\n\
         <meta name=\"uid\" content=\"{document_id}\"/>\n\
         <meta name=\"specialty\" content=\"{specialty}\"/>\n\
         <meta name=\"generator\" content=\"template_catalog\"/>\n\
         </head>\n\
         <body>\n\
         {body}\
         </body>\n\
         </html>\n"
    )
}

/// Builds the enrichment for one template. Attribution comes from a single
/// draw, so `author` always matches `firstname`/`lastname`.
pub fn generate_content<R: Rng + ?Sized>(template: &Template, rng: &mut R) -> GeneratedContent {
    let specialty = template.specialty.as_deref().unwrap_or_default();
    let sections = sections_for(specialty);
    let document = render_document(&template.title, specialty, sections, Uuid::new_v4());

    let (firstname, lastname) = *ATTRIBUTION_NAMES
        .choose(rng)
        .unwrap_or(&ATTRIBUTION_NAMES[0]);

    let area = if specialty.is_empty() {
        "general radiology"
    } else {
        specialty
    };

    GeneratedContent {
        template_data: document,
        description: format!("{} - structured reporting template for {area}.", template.title),
        author: format!("{firstname} {lastname}"),
        firstname: firstname.to_string(),
        lastname: lastname.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratePolicy {
    pub batch_size: usize,
    pub batch_pause: Duration,
}

impl Default for GeneratePolicy {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_pause: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateSummary {
    pub total: usize,
    pub updated: usize,
    pub skipped: usize,
}

pub struct Generator<'a> {
    store: &'a dyn CatalogStore,
    policy: GeneratePolicy,
}

impl<'a> Generator<'a> {
    pub fn new(store: &'a dyn CatalogStore, policy: GeneratePolicy) -> Self {
        Self { store, policy }
    }

    pub async fn generate_all(&self) -> CatalogResult<GenerateSummary> {
        let pending = self.store.templates_missing_data().await?;
        let mut summary = GenerateSummary {
            total: pending.len(),
            ..Default::default()
        };
        info!(total = summary.total, "Generating template data locally");

        for (index, batch) in pending.chunks(self.policy.batch_size.max(1)).enumerate() {
            if index > 0 && !self.policy.batch_pause.is_zero() {
                tokio::time::sleep(self.policy.batch_pause).await;
            }

            let contents: Vec<GeneratedContent> = {
                let mut rng = rand::thread_rng();
                batch
                    .iter()
                    .map(|t| generate_content(t, &mut rng))
                    .collect()
            };

            let writes = batch.iter().zip(contents.iter()).map(|(t, content)| async move {
                (t, self.store.store_generated(&t.template_id, content).await)
            });

            for (template, result) in join_all(writes).await {
                match result {
                    Ok(true) => summary.updated += 1,
                    Ok(false) => {
                        debug!(template_id = %template.template_id, "Template already has data");
                        summary.skipped += 1;
                    }
                    Err(e) => {
                        warn!(template_id = %template.template_id, error = %e, "Failed to store generated data");
                        summary.skipped += 1;
                    }
                }
            }
        }

        info!(
            updated = summary.updated,
            skipped = summary.skipped,
            "Template generation complete"
        );
        Ok(summary)
    }
}
