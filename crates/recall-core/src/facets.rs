//! Facet text rendering.
//!
//! A memory is embedded as four views: context, prediction, outcome, and the
//! combined text of everything. Lessons only feed the combined view.
//! Context, prediction, and outcome are prefixed with `"{away} at {home}"`
//! when both teams are known. A facet with none of its own fields falls back
//! to the combined text so every facet is embeddable.

use recall_state::MemoryRecord;

const FIELD_SEPARATOR: &str = " | ";
const FACET_SEPARATOR: &str = " || ";

/// The rendered texts for one memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FacetTexts {
    pub context: String,
    pub prediction: String,
    pub outcome: String,
    pub lessons: String,
    pub combined: String,
}

impl FacetTexts {
    /// Nothing usable to embed.
    pub fn is_empty(&self) -> bool {
        self.combined.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FacetTextRenderer;

impl FacetTextRenderer {
    pub fn new() -> Self {
        Self
    }

    /// `"{away} at {home}"`, or empty unless both teams are known.
    pub fn head(&self, record: &MemoryRecord) -> String {
        match (non_blank(&record.home_team), non_blank(&record.away_team)) {
            (Some(home), Some(away)) => format!("{away} at {home}"),
            _ => String::new(),
        }
    }

    pub fn render(&self, record: &MemoryRecord) -> FacetTexts {
        let head = self.head(record);

        let context_fields: Vec<String> = record
            .contextual_factors
            .iter()
            .filter(|f| !f.factor.trim().is_empty())
            .map(|f| format!("{}:{}", f.factor.trim(), f.value.trim()))
            .collect();

        let mut prediction_fields = Vec::new();
        if let Some(p) = &record.prediction {
            push_field(&mut prediction_fields, "predicted_winner", &p.predicted_winner);
            push_field(&mut prediction_fields, "home_win_prob", &p.home_win_prob);
            push_field(&mut prediction_fields, "away_win_prob", &p.away_win_prob);
            push_field(&mut prediction_fields, "confidence", &p.confidence);
        }

        let mut outcome_fields = Vec::new();
        if let Some(o) = &record.outcome {
            push_field(&mut outcome_fields, "winner", &o.winner);
            push_field(&mut outcome_fields, "home_score", &o.home_score);
            push_field(&mut outcome_fields, "away_score", &o.away_score);
        }

        let lessons = record
            .lessons_learned
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(FIELD_SEPARATOR);

        let context = with_head(&head, &context_fields);
        let prediction = with_head(&head, &prediction_fields);
        let outcome = with_head(&head, &outcome_fields);

        let parts: Vec<&str> = [&context, &prediction, &outcome, &lessons]
            .into_iter()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .collect();
        let combined = if parts.is_empty() {
            // Teams alone still identify the game.
            head
        } else {
            parts.join(FACET_SEPARATOR)
        };

        FacetTexts {
            context: or_combined(context, &combined),
            prediction: or_combined(prediction, &combined),
            outcome: or_combined(outcome, &combined),
            lessons,
            combined,
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn push_field<T: std::fmt::Display>(fields: &mut Vec<String>, name: &str, value: &Option<T>) {
    if let Some(v) = value {
        let rendered = v.to_string();
        if !rendered.trim().is_empty() {
            fields.push(format!("{name}:{}", rendered.trim()));
        }
    }
}

/// Empty when there are no fields; the head alone is not a facet.
fn with_head(head: &str, fields: &[String]) -> String {
    if fields.is_empty() {
        return String::new();
    }
    let body = fields.join(FIELD_SEPARATOR);
    if head.is_empty() {
        body
    } else {
        format!("{head}{FIELD_SEPARATOR}{body}")
    }
}

fn or_combined(facet: String, combined: &str) -> String {
    if facet.is_empty() {
        combined.to_string()
    } else {
        facet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_state::{ActualOutcome, PredictionData};

    fn full_record() -> MemoryRecord {
        MemoryRecord::new("e1", "g1")
            .with_teams("KC", "BUF")
            .with_factor("weather", "snow")
            .with_factor("rest", "short week")
            .with_prediction(PredictionData {
                predicted_winner: Some("KC".into()),
                home_win_prob: Some(0.62),
                away_win_prob: None,
                confidence: Some(0.7),
            })
            .with_outcome(ActualOutcome {
                winner: Some("BUF".into()),
                home_score: Some(20),
                away_score: Some(24),
            })
            .with_lesson("  snow games compress scoring ")
            .with_lesson("")
    }

    #[test]
    fn renders_each_facet_with_head() {
        let f = FacetTextRenderer::new().render(&full_record());
        assert_eq!(f.context, "BUF at KC | weather:snow | rest:short week");
        assert_eq!(
            f.prediction,
            "BUF at KC | predicted_winner:KC | home_win_prob:0.62 | confidence:0.7"
        );
        assert_eq!(
            f.outcome,
            "BUF at KC | winner:BUF | home_score:20 | away_score:24"
        );
        assert_eq!(f.lessons, "snow games compress scoring");
        assert!(f.combined.starts_with(&f.context));
        assert!(f.combined.ends_with("snow games compress scoring"));
    }

    #[test]
    fn missing_facets_fall_back_to_combined() {
        let rec = MemoryRecord::new("e1", "g1")
            .with_teams("KC", "BUF")
            .with_factor("weather", "clear");
        let f = FacetTextRenderer::new().render(&rec);
        assert_eq!(f.combined, "BUF at KC | weather:clear");
        assert_eq!(f.prediction, f.combined);
        assert_eq!(f.outcome, f.combined);
        assert!(f.lessons.is_empty());
    }

    #[test]
    fn head_requires_both_teams() {
        let mut rec = MemoryRecord::new("e1", "g1").with_factor("weather", "rain");
        rec.home_team = Some("KC".into());
        let f = FacetTextRenderer::new().render(&rec);
        assert_eq!(f.context, "weather:rain");
    }

    #[test]
    fn lessons_only_record_is_still_embeddable() {
        let rec = MemoryRecord::new("e1", "g1").with_lesson("fade public favourites");
        let f = FacetTextRenderer::new().render(&rec);
        assert_eq!(f.combined, "fade public favourites");
        assert_eq!(f.context, f.combined);
        assert!(!f.is_empty());
    }

    #[test]
    fn empty_record_renders_nothing() {
        let rec = MemoryRecord::new("e1", "g1").with_prediction(PredictionData::default());
        assert!(FacetTextRenderer::new().render(&rec).is_empty());
    }

    #[test]
    fn combined_non_empty_whenever_any_facet_is() {
        let records = vec![
            MemoryRecord::new("e", "g").with_factor("a", "b"),
            MemoryRecord::new("e", "g").with_outcome(ActualOutcome {
                winner: Some("KC".into()),
                ..Default::default()
            }),
            MemoryRecord::new("e", "g").with_prediction(PredictionData {
                confidence: Some(0.5),
                ..Default::default()
            }),
            MemoryRecord::new("e", "g").with_lesson("x"),
            full_record(),
        ];
        for rec in records {
            let f = FacetTextRenderer::new().render(&rec);
            assert!(!f.combined.is_empty(), "empty combined for {rec:?}");
        }
    }
}
