//! Catalog of CILT inspection tables and the per-table draft behaviour.
//!
//! Each table differs only in how its drafts are keyed, when its trailing
//! row counts as filled, and which columns are derived.

use std::{fmt, sync::Arc};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::draft::{
    derive::{DeriveRules, FlavourRule, SuffixRule, SumRule},
    key::{ContextField, DraftKeyBuilder, KeyTokens},
    rows::{AnyFieldFilled, RowCompletion, SegregationCompletion},
};

/// DD/MM/YY as stamped on packs; the line letter follows it.
const DATE_CODE_PATTERN: &str = r"\d{2}/\d{2}/\d{2}";
const DATE_CODE_FIELD: &str = "dateCode";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FormKind {
    PressureCheck,
    PaperUsage,
    ScrewCap,
    Segregation,
    CardboardPacker,
    RobotPalletizer,
}

impl FormKind {
    pub const ALL: [FormKind; 6] = [
        FormKind::PressureCheck,
        FormKind::PaperUsage,
        FormKind::ScrewCap,
        FormKind::Segregation,
        FormKind::CardboardPacker,
        FormKind::RobotPalletizer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormKind::PressureCheck => "pressure_check",
            FormKind::PaperUsage => "paper_usage",
            FormKind::ScrewCap => "screw_cap",
            FormKind::Segregation => "segregation",
            FormKind::CardboardPacker => "cardboard_packer",
            FormKind::RobotPalletizer => "robot_palletizer",
        }
    }

    fn key_fields(&self) -> &'static [ContextField] {
        use ContextField::*;
        match self {
            FormKind::PressureCheck | FormKind::ScrewCap | FormKind::Segregation => {
                &[Line, Shift, Product, Username]
            }
            FormKind::PaperUsage => &[Line, Shift, Product, Username, ProcessOrder],
            FormKind::CardboardPacker => &[Line, Shift, Product, Username, PackageType],
            FormKind::RobotPalletizer => &[Line, Shift, Username, ProcessOrder],
        }
    }

    fn derive_rules(&self) -> Result<DeriveRules> {
        let date_suffix = || SuffixRule::new(&[DATE_CODE_FIELD], DATE_CODE_PATTERN);

        let rules = match self {
            FormKind::PressureCheck => DeriveRules::default(),
            FormKind::PaperUsage => DeriveRules {
                sums: vec![SumRule::new("paperUsedKg", "paperWasteKg", "paperTotalKg")],
                ..DeriveRules::default()
            },
            FormKind::ScrewCap => DeriveRules {
                sums: vec![SumRule::new("capsUsed", "capsRejected", "capsTotal")],
                suffix: Some(date_suffix()?),
                ..DeriveRules::default()
            },
            FormKind::Segregation => DeriveRules {
                flavour: Some(FlavourRule::default()),
                suffix: Some(date_suffix()?),
                ..DeriveRules::default()
            },
            FormKind::CardboardPacker => DeriveRules {
                sums: vec![SumRule::new("cartonsGood", "cartonsRejected", "cartonsTotal")],
                suffix: Some(date_suffix()?),
                ..DeriveRules::default()
            },
            FormKind::RobotPalletizer => DeriveRules {
                sums: vec![SumRule::new("fullPallets", "partialPallets", "totalPallets")],
                ..DeriveRules::default()
            },
        };
        Ok(rules)
    }

    /// Segregation grows only on complete events; every other table grows
    /// as soon as anything is typed into the trailing row.
    fn completion(&self, rules: &DeriveRules) -> Arc<dyn RowCompletion> {
        match self {
            FormKind::Segregation => Arc::new(SegregationCompletion {
                date_code_field: DATE_CODE_FIELD.into(),
                ..SegregationCompletion::default()
            }),
            _ => match &rules.flavour {
                Some(flavour) => Arc::new(AnyFieldFilled::ignoring(&[flavour.target_field.as_str()])),
                None => Arc::new(AnyFieldFilled::new()),
            },
        }
    }

    pub fn profile(&self, tokens: &KeyTokens) -> Result<FormProfile> {
        let keys = DraftKeyBuilder::new(self.as_str(), self.key_fields())?.with_tokens(tokens.clone());
        let derive = self.derive_rules()?;
        let completion = self.completion(&derive);

        Ok(FormProfile {
            kind: *self,
            keys,
            completion,
            derive,
        })
    }
}

impl fmt::Display for FormKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct FormProfile {
    pub kind: FormKind,
    pub keys: DraftKeyBuilder,
    pub completion: Arc<dyn RowCompletion>,
    pub derive: DeriveRules,
}
