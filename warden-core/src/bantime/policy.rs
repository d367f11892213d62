use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use rand::Rng;

use super::expr::{self, Bindings, Expr};
use crate::error::ConfigurationError;
use crate::ticket::{BanTime, Ticket};
use crate::time::parse_duration;

/// Formula used when escalation is enabled without an explicit one.
pub const DEFAULT_FORMULA: &str = "ban.Time * (1<<min(ban.Count,20)) * banFactor";

lazy_static! {
    static ref DEFAULT_EXPR: Arc<Expr> =
        Arc::new(expr::parse(DEFAULT_FORMULA).expect("default formula is valid"));
}

/// Maps (base seconds, ban count) to ban seconds.
type Evaluator = Arc<dyn Fn(f64, u32) -> f64 + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BanTimeOption {
    Increment,
    Factor,
    Formula,
    Multipliers,
    MaxTime,
    RndTime,
    OverallJails,
}

impl BanTimeOption {
    pub const ALL: [BanTimeOption; 7] = [
        BanTimeOption::Increment,
        BanTimeOption::Factor,
        BanTimeOption::Formula,
        BanTimeOption::Multipliers,
        BanTimeOption::MaxTime,
        BanTimeOption::RndTime,
        BanTimeOption::OverallJails,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BanTimeOption::Increment => "increment",
            BanTimeOption::Factor => "factor",
            BanTimeOption::Formula => "formula",
            BanTimeOption::Multipliers => "multipliers",
            BanTimeOption::MaxTime => "maxtime",
            BanTimeOption::RndTime => "rndtime",
            BanTimeOption::OverallJails => "overalljails",
        }
    }
}

impl fmt::Display for BanTimeOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BanTimeOption {
    type Err = ConfigurationError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let wanted = name.trim().to_ascii_lowercase();
        BanTimeOption::ALL
            .into_iter()
            .find(|option| option.as_str() == wanted)
            .ok_or_else(|| ConfigurationError::UnknownOption(name.to_string()))
    }
}

/// One immutable set of escalation options plus the evaluator compiled
/// from exactly those options.
#[derive(Clone)]
pub struct BanTimeExtra {
    options: BTreeMap<BanTimeOption, String>,
    increment: bool,
    overall_jails: bool,
    factor: f64,
    multipliers: Vec<u64>,
    max_time: Option<Duration>,
    rnd_time: Option<Duration>,
    evaluator: Evaluator,
}

impl Default for BanTimeExtra {
    fn default() -> Self {
        Self {
            options: BTreeMap::new(),
            increment: false,
            overall_jails: false,
            factor: 1.0,
            multipliers: Vec::new(),
            max_time: None,
            rnd_time: None,
            evaluator: compile(1.0, &[], DEFAULT_EXPR.clone(), None, None),
        }
    }
}

impl fmt::Debug for BanTimeExtra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BanTimeExtra")
            .field("options", &self.options)
            .field("factor", &self.factor)
            .field("multipliers", &self.multipliers)
            .field("max_time", &self.max_time)
            .field("rnd_time", &self.rnd_time)
            .finish_non_exhaustive()
    }
}

impl BanTimeExtra {
    fn from_options(options: BTreeMap<BanTimeOption, String>) -> Result<Self, ConfigurationError> {
        let flag = |option: BanTimeOption| {
            options
                .get(&option)
                .map(|value| parse_bool(option, value))
                .transpose()
                .map(Option::unwrap_or_default)
        };
        let increment = flag(BanTimeOption::Increment)?;
        let overall_jails = flag(BanTimeOption::OverallJails)?;

        let factor = match options.get(&BanTimeOption::Factor) {
            Some(src) => parse_factor(src)?,
            None => 1.0,
        };

        let multipliers = match options.get(&BanTimeOption::Multipliers) {
            Some(src) => parse_multipliers(src)?,
            None => Vec::new(),
        };

        // Validated even when multipliers take precedence.
        let formula = match options.get(&BanTimeOption::Formula) {
            Some(src) => Arc::new(expr::parse(src).map_err(|source| {
                ConfigurationError::Expression {
                    option: BanTimeOption::Formula,
                    source,
                }
            })?),
            None => DEFAULT_EXPR.clone(),
        };

        let time = |option: BanTimeOption| {
            options
                .get(&option)
                .map(|value| parse_time(option, value))
                .transpose()
        };
        let max_time = time(BanTimeOption::MaxTime)?;
        let rnd_time = time(BanTimeOption::RndTime)?;

        let evaluator = compile(factor, &multipliers, formula, max_time, rnd_time);
        Ok(Self {
            options,
            increment,
            overall_jails,
            factor,
            multipliers,
            max_time,
            rnd_time,
            evaluator,
        })
    }

    /// Raw value of an option as it was set.
    pub fn get(&self, option: BanTimeOption) -> Option<&str> {
        self.options.get(&option).map(String::as_str)
    }

    pub fn options(&self) -> impl Iterator<Item = (BanTimeOption, &str)> {
        self.options.iter().map(|(option, value)| (*option, value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn increment(&self) -> bool {
        self.increment
    }

    pub fn overall_jails(&self) -> bool {
        self.overall_jails
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn multipliers(&self) -> &[u64] {
        &self.multipliers
    }

    pub fn max_time(&self) -> Option<Duration> {
        self.max_time
    }

    pub fn rnd_time(&self) -> Option<Duration> {
        self.rnd_time
    }

    /// Escalated duration for a base ban time and prior ban count.
    pub fn evaluate(&self, base: Duration, count: u32) -> BanTime {
        let seconds = (self.evaluator)(base.as_secs_f64(), count);
        BanTime::from_evaluated(seconds, base)
    }

    /// [`evaluate`](Self::evaluate) on the ticket's own ban time or `default`.
    /// Permanent tickets stay permanent.
    pub fn evaluate_ticket(&self, ticket: &Ticket, default: Duration) -> BanTime {
        match ticket.ban_time_or(BanTime::Finite(default)) {
            BanTime::Finite(base) => self.evaluate(base, ticket.ban_count()),
            BanTime::Permanent => BanTime::Permanent,
        }
    }

    /// The ban time an actuator should apply: escalated when `increment`
    /// is on, the ticket's own (or `default`) otherwise.
    pub fn ban_time_for(&self, ticket: &Ticket, default: Duration) -> BanTime {
        if self.increment {
            self.evaluate_ticket(ticket, default)
        } else {
            ticket.ban_time_or(BanTime::Finite(default))
        }
    }

    /// Longest ban this configuration can hand out. `flat` is the
    /// actuator's non-escalating ban time.
    pub fn max_possible_ban_time(&self, flat: Duration) -> BanTime {
        if self.increment {
            self.max_time.map_or(BanTime::Permanent, BanTime::Finite)
        } else {
            BanTime::Finite(flat)
        }
    }
}

fn compile(
    factor: f64,
    multipliers: &[u64],
    formula: Arc<Expr>,
    max_time: Option<Duration>,
    rnd_time: Option<Duration>,
) -> Evaluator {
    let mut evaluator: Evaluator = if multipliers.is_empty() {
        Arc::new(move |time, count| {
            let escalated = formula.eval(&Bindings {
                ban_time: time,
                ban_count: f64::from(count),
                ban_factor: factor,
            });
            time.max(escalated)
        })
    } else {
        // The last multiplier covers every higher count.
        let table = multipliers.to_vec();
        Arc::new(move |time, count| {
            let index = (count as usize).min(table.len() - 1);
            time * factor * table[index] as f64
        })
    };

    if let Some(max_time) = max_time {
        let max = max_time.as_secs_f64();
        let inner = evaluator;
        evaluator = Arc::new(move |time, count| inner(time, count).min(max));
    }

    // Additive jitter in [0, rndtime).
    if let Some(rnd_time) = rnd_time {
        let spread = rnd_time.as_secs_f64();
        let inner = evaluator;
        evaluator = Arc::new(move |time, count| {
            inner(time, count) + rand::rng().random::<f64>() * spread
        });
    }

    evaluator
}

fn parse_bool(option: BanTimeOption, value: &str) -> Result<bool, ConfigurationError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => Ok(true),
        "0" | "off" | "false" | "no" => Ok(false),
        _ => Err(ConfigurationError::InvalidValue {
            option,
            value: value.to_string(),
            reason: "expected a boolean".into(),
        }),
    }
}

fn parse_factor(src: &str) -> Result<f64, ConfigurationError> {
    let factor = expr::parse_constant(src).map_err(|source| ConfigurationError::Expression {
        option: BanTimeOption::Factor,
        source,
    })?;
    if !factor.is_finite() || factor < 0.0 {
        return Err(ConfigurationError::InvalidValue {
            option: BanTimeOption::Factor,
            value: src.to_string(),
            reason: "factor must be a finite, non-negative number".into(),
        });
    }
    Ok(factor)
}

fn parse_multipliers(src: &str) -> Result<Vec<u64>, ConfigurationError> {
    src.split_whitespace()
        .map(|item| {
            item.parse::<u64>()
                .map_err(|err| ConfigurationError::InvalidValue {
                    option: BanTimeOption::Multipliers,
                    value: src.to_string(),
                    reason: format!("{item:?}: {err}"),
                })
        })
        .collect()
}

fn parse_time(option: BanTimeOption, value: &str) -> Result<Duration, ConfigurationError> {
    parse_duration(value).map_err(|source| ConfigurationError::Duration {
        option,
        value: value.to_string(),
        source,
    })
}

/// Thread-safe holder of the current [`BanTimeExtra`].
///
/// Writers build a complete replacement snapshot and swap it in, so the
/// actuator thread only ever sees a formula together with the options it
/// was compiled from.
#[derive(Debug, Default)]
pub struct BanTimePolicy {
    current: RwLock<Arc<BanTimeExtra>>,
}

impl BanTimePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or, with an empty/absent value, clear) one option and recompile.
    /// On error the previous snapshot stays in place.
    pub fn set_option(
        &self,
        name: &str,
        value: Option<&str>,
    ) -> Result<Arc<BanTimeExtra>, ConfigurationError> {
        let option: BanTimeOption = name.parse()?;
        let value = value.map(str::trim).filter(|value| !value.is_empty());

        // Upgradable read serializes writers without blocking readers.
        let current = self.current.upgradable_read();
        let mut options = current.options.clone();
        match value {
            Some(value) => options.insert(option, value.to_string()),
            None => options.remove(&option),
        };
        let next = Arc::new(BanTimeExtra::from_options(options)?);

        let mut current = RwLockUpgradableReadGuard::upgrade(current);
        *current = next.clone();
        Ok(next)
    }

    /// The snapshot in effect right now.
    pub fn snapshot(&self) -> Arc<BanTimeExtra> {
        self.current.read().clone()
    }

    pub fn get(&self, option: BanTimeOption) -> Option<String> {
        self.snapshot().get(option).map(str::to_string)
    }

    pub fn evaluate(&self, base: Duration, count: u32) -> BanTime {
        self.snapshot().evaluate(base, count)
    }
}
