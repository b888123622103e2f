//! Decay, seasonal adjustment, and blending properties over input grids.

use recall_core::{
    adjusted_half_life, blended_score, decay, ExpertTemporalProfile, FacetTextRenderer,
    MemoryRecord, ProfileRegistry, RecallError, SeasonContext,
};

const HALF_LIVES: [f64; 6] = [0.5, 7.0, 45.0, 180.0, 365.0, 540.0];

#[test]
fn decay_anchor_points_hold_for_every_half_life() {
    for h in HALF_LIVES {
        assert_eq!(decay(0.0, h).unwrap(), 1.0, "h={h}");
        assert!((decay(h, h).unwrap() - 0.5).abs() < 1e-12, "h={h}");
        assert!((decay(2.0 * h, h).unwrap() - 0.25).abs() < 1e-12, "h={h}");
    }
}

#[test]
fn decay_never_increases_with_age() {
    for h in HALF_LIVES {
        let mut prev = 1.0;
        for step in 0..=2_000 {
            let d = decay(step as f64 * 0.5, h).unwrap();
            assert!(d <= prev, "h={h} age={}", step as f64 * 0.5);
            prev = d;
        }
    }
}

#[test]
fn future_dated_memories_score_one() {
    assert_eq!(decay(-30.0, 90.0).unwrap(), 1.0);
}

#[test]
fn bad_half_life_is_a_configuration_error() {
    for h in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        assert!(
            matches!(decay(10.0, h), Err(RecallError::Configuration(_))),
            "h={h}"
        );
    }
    assert!(adjusted_half_life(0.0, SeasonContext { week: 5, richness: 0.5 }).is_err());
}

#[test]
fn blended_score_stays_in_unit_interval() {
    let grid: Vec<f64> = (0..=10).map(|i| i as f64 / 10.0).collect();
    for &sw in &grid {
        let tw = 1.0 - sw;
        for &sim in &grid {
            for &rec in &grid {
                let b = blended_score(sw, tw, sim, rec);
                assert!((-1e-12..=1.0 + 1e-12).contains(&b), "sw={sw} sim={sim} rec={rec}");
            }
        }
    }
}

#[test]
fn seasonal_half_life_shrinks_with_richness_and_week() {
    let base = 120.0;
    for week in 0..=18 {
        let mut prev = f64::INFINITY;
        for i in 0..=10 {
            let richness = i as f64 / 10.0;
            let h = adjusted_half_life(base, SeasonContext { week, richness }).unwrap();
            assert!(h <= prev, "week={week} richness={richness}");
            assert!((0.5 * base..=2.0 * base).contains(&h));
            prev = h;
        }
    }
    for i in 0..=10 {
        let richness = i as f64 / 10.0;
        let mut prev = f64::INFINITY;
        for week in 0..=18 {
            let h = adjusted_half_life(base, SeasonContext { week, richness }).unwrap();
            assert!(h <= prev, "week={week} richness={richness}");
            prev = h;
        }
    }
}

#[test]
fn seasonal_half_life_is_deterministic() {
    let s = SeasonContext { week: 3, richness: 0.35 };
    assert_eq!(
        adjusted_half_life(200.0, s).unwrap(),
        adjusted_half_life(200.0, s).unwrap()
    );
    // Out-of-range richness is clamped, not rejected.
    assert_eq!(
        adjusted_half_life(200.0, SeasonContext { week: 9, richness: 4.0 }).unwrap(),
        adjusted_half_life(200.0, SeasonContext { week: 9, richness: 1.0 }).unwrap()
    );
}

#[test]
fn every_roster_profile_blends_within_bounds() {
    let registry = ProfileRegistry::with_default_roster().unwrap();
    for name in [
        "momentum_rider",
        "gut_instinct",
        "market_reader",
        "contrarian",
        "statistics_purist",
        "veteran_analyst",
    ] {
        let p = registry.get(name).unwrap();
        for age in [0.0, 30.0, 365.0, 2_000.0] {
            let r = p.recency_for(age, None).unwrap();
            let b = p.blended_score(1.0, r);
            assert!((0.0..=1.0 + 1e-12).contains(&b), "{name} age={age}");
        }
    }
    assert!(ExpertTemporalProfile::new("bad", 90.0, 0.7, 0.7).is_err());
}

#[test]
fn combined_text_present_whenever_any_facet_is() {
    let renderer = FacetTextRenderer::new();
    let records = [
        MemoryRecord::new("e", "g").with_factor("rest", "short week"),
        MemoryRecord::new("e", "g").with_lesson("fade public favourites"),
        MemoryRecord::new("e", "g")
            .with_teams("KC", "BUF")
            .with_factor("weather", "wind"),
    ];
    for record in &records {
        let texts = renderer.render(record);
        assert!(!texts.combined.is_empty());
    }
    assert!(renderer.render(&MemoryRecord::new("e", "g")).is_empty());
}
