//! Operator recommendations and contributing factors.
//!
//! Recommendations come from a fixed rule table evaluated in priority
//! order. Both outputs are pure functions of the current tick's state.

use crate::core::alert::AlertLevel;
use crate::core::audio::AudioState;
use crate::core::composite::Component;
use crate::core::features::{DetectionType, ZoneStatus};
use crate::core::zones::ZoneId;
use serde::{Deserialize, Serialize};

/// Trend component above which the factors call out a rising score.
const RISING_TREND: f64 = 25.0;

/// What the rules see of a zone.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneView {
    pub id: ZoneId,
    pub status: ZoneStatus,
    pub detection_type: DetectionType,
    pub online: bool,
}

/// Inputs to the rule table for one tick.
#[derive(Debug, Clone)]
pub struct RecommendationContext {
    pub level: AlertLevel,
    pub zones: Vec<ZoneView>,
    pub dominant: Component,
    pub audio_state: AudioState,
    pub trend: f64,
    pub offline_nodes: Vec<String>,
}

impl RecommendationContext {
    fn zone(&self, id: ZoneId) -> Option<&ZoneView> {
        self.zones.iter().find(|z| z.id == id)
    }

    fn is_crowd(&self, id: ZoneId) -> bool {
        self.zone(id)
            .is_some_and(|z| z.online && z.detection_type == DetectionType::Crowd)
    }

    fn is_elevated(&self, id: ZoneId) -> bool {
        self.zone(id).is_some_and(|z| z.status.is_elevated())
    }

    fn offline_zones(&self) -> Vec<ZoneId> {
        self.zones.iter().filter(|z| !z.online).map(|z| z.id).collect()
    }
}

/// A ranked operator action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// 1 is most urgent
    pub priority: u8,
    pub action: String,
    pub reason: String,
}

struct Rule {
    applies: fn(&RecommendationContext) -> bool,
    action: &'static str,
    reason: fn(&RecommendationContext) -> String,
}

const RULES: &[Rule] = &[
    Rule {
        applies: |c| c.level == AlertLevel::Critical,
        action: "Evacuate via all exits",
        reason: |_| "Crush risk is critical across the corridor".to_string(),
    },
    Rule {
        applies: |c| c.level >= AlertLevel::High && c.is_crowd(ZoneId::Center),
        action: "Restrict entry",
        reason: |_| "Crowd forming in CENTER zone, CENTER pressure rising".to_string(),
    },
    Rule {
        applies: |c| c.level >= AlertLevel::High && c.is_elevated(ZoneId::Entry),
        action: "Stop entry",
        reason: |_| "Entry zone pressure building".to_string(),
    },
    Rule {
        applies: |c| c.level >= AlertLevel::High && c.is_elevated(ZoneId::Exit),
        action: "Open secondary exit",
        reason: |_| "Exit zone is congested".to_string(),
    },
    Rule {
        applies: |c| {
            c.level >= AlertLevel::Moderate
                && c.dominant == Component::Audio
                && c.audio_state >= AudioState::Loud
        },
        action: "Activate PA system",
        reason: |c| format!("Crowd noise is {}", c.audio_state),
    },
    Rule {
        applies: |c| c.level >= AlertLevel::Moderate && c.dominant == Component::Movement,
        action: "Deploy crowd control staff",
        reason: |_| "Crowd movement is the main risk driver".to_string(),
    },
    Rule {
        applies: |c| c.level >= AlertLevel::Moderate && c.dominant == Component::Trend,
        action: "Prepare response team",
        reason: |_| "Risk score is climbing quickly".to_string(),
    },
    Rule {
        applies: |c| c.level >= AlertLevel::Moderate && c.dominant == Component::Density,
        action: "Reduce entry rate",
        reason: |_| "Corridor density is the main risk driver".to_string(),
    },
    Rule {
        applies: |c| !c.offline_zones().is_empty(),
        action: "Inspect offline sensor node",
        reason: |c| {
            let zones: Vec<&str> = c.offline_zones().iter().map(|z| z.as_str()).collect();
            format!("No live sensor in {}", zones.join(", "))
        },
    },
    Rule {
        applies: |c| c.level == AlertLevel::Low,
        action: "Monitor closely",
        reason: |_| "Early signs of crowd build-up".to_string(),
    },
    Rule {
        applies: |c| c.level == AlertLevel::Safe,
        action: "Continue monitoring",
        reason: |_| "Conditions are normal".to_string(),
    },
];

/// First `max` matching rules, in priority order.
pub fn recommend(ctx: &RecommendationContext, max: usize) -> Vec<Action> {
    RULES
        .iter()
        .filter(|rule| (rule.applies)(ctx))
        .take(max)
        .enumerate()
        .map(|(i, rule)| Action {
            priority: (i + 1) as u8,
            action: rule.action.to_string(),
            reason: (rule.reason)(ctx),
        })
        .collect()
}

/// Human-readable reasons behind the current score.
pub fn contributing_factors(ctx: &RecommendationContext) -> Vec<String> {
    let mut factors = Vec::new();

    for zone in ctx.zones.iter().filter(|z| z.online) {
        if zone.status.is_elevated() {
            factors.push(format!("{} zone at {} pressure", zone.id, zone.status));
        }
        if zone.detection_type == DetectionType::Crowd {
            factors.push(format!("Crowd detected in {} zone", zone.id));
        }
    }

    match ctx.audio_state {
        AudioState::Scream => factors.push("Screaming detected".to_string()),
        AudioState::Loud => factors.push("Loud crowd noise".to_string()),
        _ => {}
    }

    if ctx.trend >= RISING_TREND {
        factors.push("Risk score rising quickly".to_string());
    }

    for node in &ctx.offline_nodes {
        factors.push(format!("Sensor {node} offline"));
    }

    if factors.is_empty() {
        factors.push("No major risk factors".to_string());
    }
    factors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(id: ZoneId, status: ZoneStatus, detection_type: DetectionType) -> ZoneView {
        ZoneView {
            id,
            status,
            detection_type,
            online: status != ZoneStatus::Offline,
        }
    }

    fn calm() -> RecommendationContext {
        RecommendationContext {
            level: AlertLevel::Safe,
            zones: vec![
                zone(ZoneId::Entry, ZoneStatus::Green, DetectionType::Clear),
                zone(ZoneId::Center, ZoneStatus::Green, DetectionType::Clear),
                zone(ZoneId::Exit, ZoneStatus::Green, DetectionType::Clear),
            ],
            dominant: Component::Movement,
            audio_state: AudioState::Quiet,
            trend: 0.0,
            offline_nodes: Vec::new(),
        }
    }

    fn actions(ctx: &RecommendationContext) -> Vec<String> {
        recommend(ctx, 5).into_iter().map(|a| a.action).collect()
    }

    #[test]
    fn test_safe_continue_monitoring() {
        assert_eq!(actions(&calm()), vec!["Continue monitoring"]);
        assert_eq!(contributing_factors(&calm()), vec!["No major risk factors"]);
    }

    #[test]
    fn test_low_monitor_closely() {
        let mut ctx = calm();
        ctx.level = AlertLevel::Low;
        assert_eq!(actions(&ctx), vec!["Monitor closely"]);
    }

    #[test]
    fn test_high_with_center_crowd_restricts_entry() {
        let mut ctx = calm();
        ctx.level = AlertLevel::High;
        ctx.zones[1] = zone(ZoneId::Center, ZoneStatus::Red, DetectionType::Crowd);
        let out = recommend(&ctx, 5);
        assert_eq!(out[0].action, "Restrict entry");
        assert_eq!(out[0].priority, 1);
        assert!(out[0].reason.contains("CENTER"));
        assert_eq!(out[1].action, "Deploy crowd control staff");
    }

    #[test]
    fn test_high_with_elevated_entry_stops_entry() {
        let mut ctx = calm();
        ctx.level = AlertLevel::High;
        ctx.zones[0] = zone(ZoneId::Entry, ZoneStatus::Orange, DetectionType::SinglePerson);
        let out = recommend(&ctx, 5);
        assert_eq!(out[0].action, "Stop entry");
        assert_eq!(out[0].reason, "Entry zone pressure building");
    }

    #[test]
    fn test_critical_ordering_and_limit() {
        let ctx = RecommendationContext {
            level: AlertLevel::Critical,
            zones: vec![
                zone(ZoneId::Entry, ZoneStatus::Black, DetectionType::Crowd),
                zone(ZoneId::Center, ZoneStatus::Black, DetectionType::Crowd),
                zone(ZoneId::Exit, ZoneStatus::Red, DetectionType::Crowd),
            ],
            dominant: Component::Movement,
            audio_state: AudioState::Scream,
            trend: 40.0,
            offline_nodes: Vec::new(),
        };
        assert_eq!(
            actions(&ctx),
            vec![
                "Evacuate via all exits",
                "Restrict entry",
                "Stop entry",
                "Open secondary exit",
                "Deploy crowd control staff",
            ]
        );
        assert_eq!(recommend(&ctx, 2).len(), 2);
    }

    #[test]
    fn test_audio_dominant_activates_pa() {
        let mut ctx = calm();
        ctx.level = AlertLevel::Moderate;
        ctx.dominant = Component::Audio;
        ctx.audio_state = AudioState::Scream;
        assert_eq!(actions(&ctx), vec!["Activate PA system"]);
    }

    #[test]
    fn test_offline_zone_flagged() {
        let mut ctx = calm();
        ctx.zones[2] = zone(ZoneId::Exit, ZoneStatus::Offline, DetectionType::Unknown);
        ctx.offline_nodes = vec!["NODE_B".to_string()];
        let out = recommend(&ctx, 5);
        assert_eq!(out[0].action, "Inspect offline sensor node");
        assert!(out[0].reason.contains("EXIT"));
        assert!(contributing_factors(&ctx).contains(&"Sensor NODE_B offline".to_string()));
    }

    #[test]
    fn test_factors_list_crowd_and_audio() {
        let mut ctx = calm();
        ctx.zones[1] = zone(ZoneId::Center, ZoneStatus::Red, DetectionType::Crowd);
        ctx.audio_state = AudioState::Loud;
        let factors = contributing_factors(&ctx);
        assert_eq!(
            factors,
            vec![
                "CENTER zone at RED pressure".to_string(),
                "Crowd detected in CENTER zone".to_string(),
                "Loud crowd noise".to_string(),
            ]
        );
    }
}
