//! Plain-text rendering of a [`RetrievalBundle`].

use std::fmt::Write;

use recall_state::{KnowledgeEntry, ScoredMemory};

use crate::retrieval::{MatchupOrientation, RetrievalBundle};

/// Renders a bundle as `## label` sections separated by blank lines. Empty
/// sections are omitted; an empty bundle renders as an empty string.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptFormatter;

impl PromptFormatter {
    pub fn new() -> Self {
        Self
    }

    pub fn format(&self, bundle: &RetrievalBundle) -> String {
        let mut sections: Vec<(String, String)> = Vec::new();

        if !bundle.episodic.is_empty() {
            let mut s = String::new();
            for (i, m) in bundle.episodic.iter().enumerate() {
                let _ = writeln!(s, "{}. {}", i + 1, experience_line(m));
            }
            sections.push(("Relevant past experiences".into(), s));
        }

        for (team, entries) in [
            (&bundle.home_team, &bundle.home_knowledge),
            (&bundle.away_team, &bundle.away_knowledge),
        ] {
            if let (Some(team), false) = (team, entries.is_empty()) {
                sections.push((format!("{team} knowledge"), knowledge_lines(entries)));
            }
        }

        if let Some(m) = &bundle.matchup {
            let mut s = String::new();
            let _ = write!(
                s,
                "- {} vs {} ({} games analyzed",
                m.memory.team_a_id, m.memory.team_b_id, m.memory.games_analyzed
            );
            if let Some(acc) = m.memory.expert_accuracy {
                let _ = write!(s, ", accuracy {:.0}%", acc * 100.0);
            }
            if m.orientation == MatchupOrientation::Reversed {
                s.push_str(", reversed orientation");
            }
            let _ = writeln!(s, "): {}", m.memory.summary.trim());
            sections.push(("Head-to-head history".into(), s));
        }

        sections
            .iter()
            .map(|(label, body)| format!("## {label}\n{}", body.trim_end()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn experience_line(m: &ScoredMemory) -> String {
    let record = &m.memory;
    let mut line = match (&record.away_team, &record.home_team) {
        (Some(away), Some(home)) => format!("{away} at {home} ({})", record.game_id),
        _ => record.game_id.clone(),
    };

    if let Some(winner) = record
        .prediction
        .as_ref()
        .and_then(|p| p.predicted_winner.as_deref())
    {
        let _ = write!(line, ": predicted {winner}");
    }
    if let Some(o) = &record.outcome {
        if let Some(winner) = &o.winner {
            let _ = write!(line, ", actual {winner}");
        }
        if let (Some(h), Some(a)) = (o.home_score, o.away_score) {
            let _ = write!(line, " {h}-{a}");
        }
    }
    let _ = write!(
        line,
        " [similarity {:.2}, recency {:.2}]",
        m.similarity_score, m.recency_score
    );

    let lessons: Vec<&str> = record
        .lessons_learned
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();
    if !lessons.is_empty() {
        let _ = write!(line, " Lessons: {}", lessons.join("; "));
    }
    line
}

fn knowledge_lines(entries: &[KnowledgeEntry]) -> String {
    let mut s = String::new();
    for k in entries {
        let _ = writeln!(
            s,
            "- {} ({:.0}% confidence): {}",
            k.knowledge_type,
            k.confidence_level * 100.0,
            k.knowledge_summary.trim()
        );
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::OrientedMatchup;
    use chrono::Utc;
    use recall_state::{ActualOutcome, MatchupMemory, MemoryRecord, PredictionData};

    fn bundle() -> RetrievalBundle {
        RetrievalBundle {
            expert_id: "contrarian".into(),
            home_team: Some("KC".into()),
            away_team: Some("BUF".into()),
            episodic: Vec::new(),
            home_knowledge: Vec::new(),
            away_knowledge: Vec::new(),
            matchup: None,
            degraded: Vec::new(),
            elapsed_ms: 0,
        }
    }

    #[test]
    fn empty_bundle_renders_nothing() {
        assert_eq!(PromptFormatter::new().format(&bundle()), "");
    }

    #[test]
    fn renders_populated_sections_only() {
        let mut b = bundle();
        let record = MemoryRecord::new("contrarian", "2024_W10_BUF_KC")
            .with_teams("KC", "BUF")
            .with_prediction(PredictionData {
                predicted_winner: Some("BUF".into()),
                ..Default::default()
            })
            .with_outcome(ActualOutcome {
                winner: Some("KC".into()),
                home_score: Some(27),
                away_score: Some(24),
            })
            .with_lesson("home crowd mattered");
        b.episodic.push(ScoredMemory {
            memory: record,
            similarity_score: 0.81,
            recency_score: 0.5,
            blended_score: 0.6,
        });
        b.home_knowledge.push(KnowledgeEntry {
            expert_id: "contrarian".into(),
            team_id: "KC".into(),
            knowledge_type: "late_game".into(),
            knowledge_summary: "closes well".into(),
            confidence_level: 0.9,
            updated_at: Utc::now(),
        });
        b.matchup = Some(OrientedMatchup {
            memory: MatchupMemory {
                expert_id: "contrarian".into(),
                team_a_id: "BUF".into(),
                team_b_id: "KC".into(),
                summary: "tight games".into(),
                games_analyzed: 4,
                expert_accuracy: Some(0.75),
                updated_at: Utc::now(),
            },
            orientation: MatchupOrientation::Reversed,
        });

        let text = PromptFormatter::new().format(&b);
        assert!(text.starts_with("## Relevant past experiences\n1. "));
        assert!(text.contains("BUF at KC (2024_W10_BUF_KC): predicted BUF, actual KC 27-24"));
        assert!(text.contains("Lessons: home crowd mattered"));
        assert!(text.contains("\n\n## KC knowledge\n- late_game (90% confidence): closes well"));
        assert!(!text.contains("BUF knowledge"));
        assert!(text.contains("## Head-to-head history\n- BUF vs KC (4 games analyzed"));
        assert!(text.contains("accuracy 75%, reversed orientation"));
    }
}
