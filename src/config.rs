//! Search configuration for expressing and performing charts.
//!
//! Configs deserialize from JSON with the field names of the external
//! interface and validate synchronously before any search runs; every
//! violation is reported, not just the first.

use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use serde::Deserialize;

use crate::error::Error;
use crate::step_types::{StepType, STEP_TYPES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum BracketParsingMethod {
    #[default]
    Balanced,
    Aggressive,
    NoBrackets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum BracketParsingDetermination {
    #[default]
    ChooseMethodDynamically,
    UseDefaultMethod,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ExpressedChartConfig {
    pub default_bracket_parsing_method: BracketParsingMethod,
    pub bracket_parsing_determination: BracketParsingDetermination,
    /// Charts rated below this never parse brackets dynamically.
    pub min_level_for_brackets: u32,
    pub use_aggressive_brackets_when_more_simultaneous_notes_than_can_be_covered_without_brackets:
        bool,
    /// Balanced searches producing more brackets per minute than this are
    /// redone aggressively.
    pub balanced_brackets_per_minute_for_aggressive_brackets: f64,
    /// Balanced searches producing fewer brackets per minute than this are
    /// redone with brackets disabled.
    pub balanced_brackets_per_minute_for_no_brackets: f64,
}

impl Default for ExpressedChartConfig {
    fn default() -> Self {
        Self {
            default_bracket_parsing_method: BracketParsingMethod::Balanced,
            bracket_parsing_determination: BracketParsingDetermination::UseDefaultMethod,
            min_level_for_brackets: 7,
            use_aggressive_brackets_when_more_simultaneous_notes_than_can_be_covered_without_brackets: true,
            balanced_brackets_per_minute_for_aggressive_brackets: 3.0,
            balanced_brackets_per_minute_for_no_brackets: 1.0,
        }
    }
}

impl ExpressedChartConfig {
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        if self.balanced_brackets_per_minute_for_aggressive_brackets < 0.0 {
            errors.push(
                "BalancedBracketsPerMinuteForAggressiveBrackets must be non-negative".to_string(),
            );
        }
        if self.balanced_brackets_per_minute_for_no_brackets < 0.0 {
            errors
                .push("BalancedBracketsPerMinuteForNoBrackets must be non-negative".to_string());
        }
        if self.balanced_brackets_per_minute_for_no_brackets
            > self.balanced_brackets_per_minute_for_aggressive_brackets
        {
            errors.push(
                "BalancedBracketsPerMinuteForNoBrackets must not exceed BalancedBracketsPerMinuteForAggressiveBrackets"
                    .to_string(),
            );
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfig(errors))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FacingConfig {
    pub max_inward_percentage: f64,
    pub max_outward_percentage: f64,
}

impl Default for FacingConfig {
    fn default() -> Self {
        Self {
            max_inward_percentage: 1.0,
            max_outward_percentage: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StepTighteningConfig {
    pub travel_speed_min_time_seconds: f64,
    pub travel_speed_max_time_seconds: f64,
    pub travel_distance_min: f64,
    pub travel_distance_max: f64,
    pub stretch_distance_min: f64,
    pub stretch_distance_max: f64,
}

impl Default for StepTighteningConfig {
    fn default() -> Self {
        Self {
            travel_speed_min_time_seconds: 0.176_471,
            travel_speed_max_time_seconds: 0.24,
            travel_distance_min: 2.25,
            travel_distance_max: 3.0,
            stretch_distance_min: 3.35,
            stretch_distance_max: 4.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LateralTighteningConfig {
    /// Number of consecutive unidirectional lateral moves forming a pattern.
    pub pattern_length: usize,
    pub relative_nps: f64,
    pub absolute_nps: f64,
    /// Lateral body speed, in arrows per second, above which the pattern is
    /// penalized.
    pub speed: f64,
}

impl Default for LateralTighteningConfig {
    fn default() -> Self {
        Self {
            pattern_length: 5,
            relative_nps: 1.65,
            absolute_nps: 12.0,
            speed: 3.0,
        }
    }
}

/// Desired proportions of step categories within a section; `None` disables
/// the section cost.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SectionStepTypeWeights {
    pub same_arrow: f64,
    pub new_arrow: f64,
    pub bracketable_new_arrow: f64,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct PerformedChartConfig {
    pub facing: FacingConfig,
    pub step_tightening: StepTighteningConfig,
    pub lateral_tightening: LateralTighteningConfig,
    /// Map from step type name to ordered fallback names. A value starting
    /// with `*` splices in another entry's list. Empty means the built-in
    /// defaults.
    pub step_type_fallbacks: BTreeMap<String, Vec<String>>,
    /// Per-chart-type relative lane weights, normalized at use.
    pub arrow_weights: BTreeMap<String, Vec<u32>>,
    /// 0 disables the streak cost.
    pub max_same_arrows_in_a_row_per_foot: u32,
    pub section_step_type_weights: Option<SectionStepTypeWeights>,
}

impl PerformedChartConfig {
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();

        for (name, value) in [
            ("MaxInwardPercentage", self.facing.max_inward_percentage),
            ("MaxOutwardPercentage", self.facing.max_outward_percentage),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(format!("Facing.{name} must be within [0, 1]"));
            }
        }

        let st = &self.step_tightening;
        for (name, min, max) in [
            (
                "TravelSpeedMinTimeSeconds/TravelSpeedMaxTimeSeconds",
                st.travel_speed_min_time_seconds,
                st.travel_speed_max_time_seconds,
            ),
            (
                "TravelDistanceMin/TravelDistanceMax",
                st.travel_distance_min,
                st.travel_distance_max,
            ),
            (
                "StretchDistanceMin/StretchDistanceMax",
                st.stretch_distance_min,
                st.stretch_distance_max,
            ),
        ] {
            if min < 0.0 {
                errors.push(format!("StepTightening.{name}: minimum must be non-negative"));
            }
            if min > max {
                errors.push(format!("StepTightening.{name}: minimum exceeds maximum"));
            }
        }

        let lt = &self.lateral_tightening;
        if lt.pattern_length == 0 {
            errors.push("LateralTightening.PatternLength must be at least 1".to_string());
        }
        if lt.relative_nps < 0.0 || lt.absolute_nps < 0.0 || lt.speed < 0.0 {
            errors.push("LateralTightening rates must be non-negative".to_string());
        }

        if let Some(weights) = &self.section_step_type_weights {
            if weights.same_arrow < 0.0
                || weights.new_arrow < 0.0
                || weights.bracketable_new_arrow < 0.0
            {
                errors.push("SectionStepTypeWeights must be non-negative".to_string());
            }
        }

        for (chart_type, weights) in &self.arrow_weights {
            if weights.is_empty() {
                errors.push(format!("ArrowWeights for {chart_type:?} must not be empty"));
            }
            if weights.iter().all(|&w| w == 0) {
                errors.push(format!("ArrowWeights for {chart_type:?} must not be all zero"));
            }
        }

        if let Err(mut fallback_errors) = self.resolve_fallbacks() {
            errors.append(&mut fallback_errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfig(errors))
        }
    }

    /// The raw fallback table in effect: the configured one, or the built-in
    /// defaults when the config carries none.
    #[must_use]
    pub fn raw_fallbacks(&self) -> BTreeMap<String, Vec<String>> {
        if self.step_type_fallbacks.is_empty() {
            default_step_type_fallbacks()
        } else {
            self.step_type_fallbacks.clone()
        }
    }

    /// Expands `*Name` includes and parses names, detecting cycles. Errors are
    /// collected rather than short-circuited.
    pub fn resolve_fallbacks(&self) -> Result<HashMap<StepType, Vec<StepType>>, Vec<String>> {
        let raw = self.raw_fallbacks();
        let mut errors = Vec::new();
        let mut resolved: HashMap<String, Vec<String>> = HashMap::new();

        fn expand(
            key: &str,
            raw: &BTreeMap<String, Vec<String>>,
            resolved: &mut HashMap<String, Vec<String>>,
            stack: &mut Vec<String>,
            errors: &mut Vec<String>,
        ) -> Vec<String> {
            if let Some(done) = resolved.get(key) {
                return done.clone();
            }
            if stack.iter().any(|s| s == key) {
                errors.push(format!(
                    "StepTypeFallback cycle through {:?}",
                    stack.join(" -> ")
                ));
                return Vec::new();
            }
            let Some(entries) = raw.get(key) else {
                errors.push(format!("missing StepTypeFallback entry for {key:?}"));
                return Vec::new();
            };
            stack.push(key.to_string());
            let mut out = Vec::new();
            for entry in entries {
                if let Some(include) = entry.strip_prefix('*') {
                    for name in expand(include, raw, resolved, stack, errors) {
                        if !out.contains(&name) {
                            out.push(name);
                        }
                    }
                } else if !out.contains(entry) {
                    out.push(entry.clone());
                }
            }
            stack.pop();
            resolved.insert(key.to_string(), out.clone());
            out
        }

        let mut table = HashMap::new();
        for &step_type in &STEP_TYPES {
            let key = step_type.name();
            if !raw.contains_key(key) {
                errors.push(format!("missing StepTypeFallback entry for {key:?}"));
                continue;
            }
            let mut stack = Vec::new();
            let names = expand(key, &raw, &mut resolved, &mut stack, &mut errors);
            let mut list = Vec::with_capacity(names.len());
            for name in names {
                match name.parse::<StepType>() {
                    Ok(parsed) => list.push(parsed),
                    Err(_) => errors.push(format!("unknown StepType {name:?} in StepTypeFallbacks")),
                }
            }
            table.insert(step_type, list);
        }

        if errors.is_empty() {
            Ok(table)
        } else {
            errors.sort();
            errors.dedup();
            Err(errors)
        }
    }

    /// Lane weights for a chart type, normalized to sum 1. Errors when the
    /// length does not match the target pad.
    pub fn normalized_arrow_weights(
        &self,
        chart_type: &str,
        lanes: usize,
    ) -> Result<Option<Vec<f64>>, Error> {
        let Some(weights) = self.arrow_weights.get(chart_type) else {
            return Ok(None);
        };
        if weights.len() != lanes {
            return Err(Error::InvalidConfig(vec![format!(
                "ArrowWeights length mismatch for {chart_type:?}: {} weights for {lanes} lanes",
                weights.len()
            )]));
        }
        let total: u32 = weights.iter().sum();
        if total == 0 {
            return Err(Error::InvalidConfig(vec![format!(
                "ArrowWeights for {chart_type:?} must not be all zero"
            )]));
        }
        Ok(Some(
            weights
                .iter()
                .map(|&w| f64::from(w) / f64::from(total))
                .collect(),
        ))
    }

    /// Stable identity of the fallback table, used to key the process-wide
    /// replacement cache.
    #[must_use]
    pub fn fallback_identity(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for (key, values) in self.raw_fallbacks() {
            key.hash(&mut hasher);
            values.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// The built-in fallback table. Every step type degrades toward the plain
/// steps a player would substitute when the literal technique is unavailable
/// on the target pad.
#[must_use]
pub fn default_step_type_fallbacks() -> BTreeMap<String, Vec<String>> {
    let mut map = BTreeMap::new();
    let mut add = |key: &str, values: &[&str]| {
        map.insert(
            key.to_string(),
            values.iter().map(|s| (*s).to_string()).collect(),
        );
    };

    add("SameArrow", &["SameArrow", "NewArrow"]);
    add("NewArrow", &["NewArrow", "SameArrow"]);
    add("NewArrowStretch", &["NewArrowStretch", "*NewArrow"]);
    add("CrossoverFront", &["CrossoverFront", "NewArrow", "SameArrow"]);
    add(
        "CrossoverBehind",
        &["CrossoverBehind", "NewArrow", "SameArrow"],
    );
    add(
        "CrossoverFrontStretch",
        &["CrossoverFrontStretch", "*CrossoverFront"],
    );
    add(
        "CrossoverBehindStretch",
        &["CrossoverBehindStretch", "*CrossoverBehind"],
    );
    add(
        "InvertFront",
        &["InvertFront", "CrossoverFront", "NewArrow", "SameArrow"],
    );
    add(
        "InvertBehind",
        &["InvertBehind", "CrossoverBehind", "NewArrow", "SameArrow"],
    );
    add("InvertFrontStretch", &["InvertFrontStretch", "*InvertFront"]);
    add(
        "InvertBehindStretch",
        &["InvertBehindStretch", "*InvertBehind"],
    );
    add("FootSwap", &["FootSwap", "SameArrow", "NewArrow"]);
    add("FootSwapCrossoverFront", &["FootSwapCrossoverFront", "*FootSwap"]);
    add(
        "FootSwapCrossoverBehind",
        &["FootSwapCrossoverBehind", "*FootSwap"],
    );
    add("FootSwapInvertFront", &["FootSwapInvertFront", "*FootSwap"]);
    add("FootSwapInvertBehind", &["FootSwapInvertBehind", "*FootSwap"]);
    add(
        "Swing",
        &["Swing", "CrossoverFront", "CrossoverBehind", "NewArrow", "SameArrow"],
    );
    add("BracketOneArrowHeelSame", &["BracketOneArrowHeelSame", "SameArrow"]);
    add("BracketOneArrowHeelNew", &["BracketOneArrowHeelNew", "NewArrow"]);
    add(
        "BracketOneArrowHeelSwap",
        &["BracketOneArrowHeelSwap", "FootSwap", "NewArrow"],
    );
    add("BracketOneArrowToeSame", &["BracketOneArrowToeSame", "SameArrow"]);
    add("BracketOneArrowToeNew", &["BracketOneArrowToeNew", "NewArrow"]);
    add(
        "BracketOneArrowToeSwap",
        &["BracketOneArrowToeSwap", "FootSwap", "NewArrow"],
    );
    add("BracketHeelNewToeNew", &["BracketHeelNewToeNew", "NewArrow"]);
    add(
        "BracketHeelNewToeSame",
        &["BracketHeelNewToeSame", "SameArrow", "NewArrow"],
    );
    add(
        "BracketHeelNewToeSwap",
        &["BracketHeelNewToeSwap", "FootSwap", "NewArrow"],
    );
    add(
        "BracketHeelSameToeNew",
        &["BracketHeelSameToeNew", "SameArrow", "NewArrow"],
    );
    add(
        "BracketHeelSameToeSame",
        &["BracketHeelSameToeSame", "SameArrow"],
    );
    add(
        "BracketHeelSameToeSwap",
        &["BracketHeelSameToeSwap", "FootSwap", "SameArrow"],
    );
    add(
        "BracketHeelSwapToeNew",
        &["BracketHeelSwapToeNew", "FootSwap", "NewArrow"],
    );
    add(
        "BracketHeelSwapToeSame",
        &["BracketHeelSwapToeSame", "FootSwap", "SameArrow"],
    );
    add(
        "BracketHeelSwapToeSwap",
        &["BracketHeelSwapToeSwap", "FootSwap"],
    );
    for flavored in [
        "BracketCrossoverFrontHeelNewToeNew",
        "BracketCrossoverBehindHeelNewToeNew",
        "BracketInvertFrontHeelNewToeNew",
        "BracketInvertBehindHeelNewToeNew",
        "BracketStretchHeelNewToeNew",
    ] {
        map.insert(
            flavored.to_string(),
            vec![flavored.to_string(), "*BracketHeelNewToeNew".to_string()],
        );
    }
    for flavored in [
        "BracketCrossoverFrontHeelNewToeSame",
        "BracketCrossoverBehindHeelNewToeSame",
        "BracketInvertFrontHeelNewToeSame",
        "BracketInvertBehindHeelNewToeSame",
        "BracketStretchHeelNewToeSame",
    ] {
        map.insert(
            flavored.to_string(),
            vec![flavored.to_string(), "*BracketHeelNewToeSame".to_string()],
        );
    }
    for flavored in [
        "BracketCrossoverFrontHeelSameToeNew",
        "BracketCrossoverBehindHeelSameToeNew",
        "BracketInvertFrontHeelSameToeNew",
        "BracketInvertBehindHeelSameToeNew",
        "BracketStretchHeelSameToeNew",
    ] {
        map.insert(
            flavored.to_string(),
            vec![flavored.to_string(), "*BracketHeelSameToeNew".to_string()],
        );
    }
    map.insert(
        "BracketSwing".to_string(),
        vec!["BracketSwing".to_string(), "*BracketHeelNewToeNew".to_string()],
    );
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configs_validate() {
        ExpressedChartConfig::default().validate().unwrap();
        PerformedChartConfig::default().validate().unwrap();
    }

    #[test]
    fn default_fallbacks_cover_every_step_type_and_start_with_identity() {
        let config = PerformedChartConfig::default();
        let table = config.resolve_fallbacks().unwrap();
        for &step_type in &STEP_TYPES {
            let list = table.get(&step_type).unwrap();
            assert_eq!(list.first(), Some(&step_type), "{}", step_type.name());
        }
    }

    #[test]
    fn include_syntax_expands_referenced_entries() {
        let config = PerformedChartConfig::default();
        let table = config.resolve_fallbacks().unwrap();
        let invert_stretch = &table[&StepType::InvertFrontStretch];
        // *InvertFront splices the full chain in.
        assert!(invert_stretch.contains(&StepType::CrossoverFront));
        assert!(invert_stretch.contains(&StepType::SameArrow));
    }

    #[test]
    fn fallback_cycles_are_reported() {
        let mut config = PerformedChartConfig::default();
        let mut raw = default_step_type_fallbacks();
        raw.insert(
            "NewArrow".to_string(),
            vec!["*SameArrow".to_string()],
        );
        raw.insert(
            "SameArrow".to_string(),
            vec!["*NewArrow".to_string()],
        );
        config.step_type_fallbacks = raw;
        let errors = config.resolve_fallbacks().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("cycle")));
    }

    #[test]
    fn missing_entries_and_unknown_names_are_reported() {
        let mut config = PerformedChartConfig::default();
        let mut raw = default_step_type_fallbacks();
        raw.remove("Swing");
        raw.insert(
            "NewArrow".to_string(),
            vec!["NotAStep".to_string()],
        );
        config.step_type_fallbacks = raw;
        let errors = config.resolve_fallbacks().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("missing StepTypeFallback")));
        assert!(errors.iter().any(|e| e.contains("unknown StepType")));
    }

    #[test]
    fn arrow_weights_length_mismatch_is_an_error() {
        let mut config = PerformedChartConfig::default();
        config
            .arrow_weights
            .insert("dance-single".to_string(), vec![1, 1, 1]);
        let err = config.normalized_arrow_weights("dance-single", 4).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        let ok = config.normalized_arrow_weights("dance-double", 8).unwrap();
        assert!(ok.is_none());
    }

    #[test]
    fn bad_tightening_ranges_are_collected() {
        let mut config = PerformedChartConfig::default();
        config.step_tightening.travel_distance_min = 5.0;
        config.step_tightening.travel_distance_max = 1.0;
        config.facing.max_inward_percentage = 1.5;
        let Err(Error::InvalidConfig(errors)) = config.validate() else {
            panic!("expected invalid config");
        };
        assert!(errors.len() >= 2);
    }

    #[test]
    fn configs_deserialize_from_external_field_names() {
        let expressed: ExpressedChartConfig = serde_json::from_str(
            r#"{
                "DefaultBracketParsingMethod": "Aggressive",
                "BracketParsingDetermination": "ChooseMethodDynamically",
                "MinLevelForBrackets": 9,
                "BalancedBracketsPerMinuteForAggressiveBrackets": 4.5,
                "BalancedBracketsPerMinuteForNoBrackets": 0.5
            }"#,
        )
        .unwrap();
        assert_eq!(
            expressed.default_bracket_parsing_method,
            BracketParsingMethod::Aggressive
        );
        assert_eq!(expressed.min_level_for_brackets, 9);

        let performed: PerformedChartConfig = serde_json::from_str(
            r#"{
                "StepTightening": {"TravelDistanceMin": 1.0, "TravelDistanceMax": 2.0},
                "LateralTightening": {"PatternLength": 3},
                "ArrowWeights": {"dance-single": [25, 25, 25, 25]},
                "MaxSameArrowsInARowPerFoot": 4
            }"#,
        )
        .unwrap();
        assert_eq!(performed.lateral_tightening.pattern_length, 3);
        assert_eq!(performed.max_same_arrows_in_a_row_per_foot, 4);
        performed.validate().unwrap();
    }
}
