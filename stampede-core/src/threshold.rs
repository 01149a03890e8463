//! Threshold predicates of the form `<aggregator>[(<args>)] <op> <value>`, e.g. `p(99)<1000`
//! or `rate < 0.1`.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of a metric series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Fraction of `true` observations.
    Rate,
    /// Distribution of numeric observations, queryable by percentile.
    Trend,
    /// Monotonic sum.
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Rate => "rate",
            MetricKind::Trend => "trend",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregator {
    Rate,
    Count,
    Avg,
    Min,
    Max,
    Med,
    /// Nearest-rank percentile, `0 < p <= 100`.
    Percentile(f64),
}

impl Aggregator {
    /// Whether this aggregator can be computed over a series of the given kind.
    pub fn applies_to(&self, kind: MetricKind) -> bool {
        matches!(
            (self, kind),
            (Aggregator::Rate, MetricKind::Rate)
                | (Aggregator::Count, MetricKind::Counter)
                | (
                    Aggregator::Avg
                        | Aggregator::Min
                        | Aggregator::Max
                        | Aggregator::Med
                        | Aggregator::Percentile(_),
                    MetricKind::Trend
                )
        )
    }
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregator::Rate => f.write_str("rate"),
            Aggregator::Count => f.write_str("count"),
            Aggregator::Avg => f.write_str("avg"),
            Aggregator::Min => f.write_str("min"),
            Aggregator::Max => f.write_str("max"),
            Aggregator::Med => f.write_str("med"),
            Aggregator::Percentile(p) => write!(f, "p({p})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Operator {
    fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::Lt => lhs < rhs,
            Operator::Le => lhs <= rhs,
            Operator::Gt => lhs > rhs,
            Operator::Ge => lhs >= rhs,
            Operator::Eq => lhs == rhs,
            Operator::Ne => lhs != rhs,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
        })
    }
}

/// A parsed threshold predicate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub aggregator: Aggregator,
    pub op: Operator,
    pub value: f64,
}

impl ThresholdExpr {
    pub fn new(aggregator: Aggregator, op: Operator, value: f64) -> Self {
        Self {
            aggregator,
            op,
            value,
        }
    }

    /// Returns `true` when the observed aggregate satisfies the predicate.
    pub fn holds(&self, observed: f64) -> bool {
        self.op.apply(observed, self.value)
    }
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.aggregator, self.op, self.value)
    }
}

/// Parse failure for a threshold predicate. The config layer attaches the field path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ParseThresholdError(String);

impl FromStr for ThresholdExpr {
    type Err = ParseThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let op_at = s
            .find(['<', '>', '=', '!'])
            .ok_or_else(|| ParseThresholdError("missing comparison operator".to_string()))?;
        let (lhs, rest) = s.split_at(op_at);

        let (op, rhs) = split_operator(rest)?;
        let aggregator = parse_aggregator(lhs.trim())?;

        let rhs = rhs.trim();
        let value: f64 = rhs
            .parse()
            .map_err(|_| ParseThresholdError(format!("`{rhs}` is not a number")))?;
        if !value.is_finite() {
            return Err(ParseThresholdError(format!("`{rhs}` is not finite")));
        }

        Ok(Self {
            aggregator,
            op,
            value,
        })
    }
}

fn split_operator(s: &str) -> Result<(Operator, &str), ParseThresholdError> {
    // Longest tokens first so `<=` is not read as `<`.
    const OPS: [(&str, Operator); 7] = [
        ("===", Operator::Eq),
        ("<=", Operator::Le),
        (">=", Operator::Ge),
        ("==", Operator::Eq),
        ("!=", Operator::Ne),
        ("<", Operator::Lt),
        (">", Operator::Gt),
    ];

    OPS.iter()
        .find_map(|(token, op)| s.strip_prefix(token).map(|rest| (*op, rest)))
        .ok_or_else(|| ParseThresholdError(format!("unknown operator in `{s}`")))
}

fn parse_aggregator(s: &str) -> Result<Aggregator, ParseThresholdError> {
    match s {
        "rate" => return Ok(Aggregator::Rate),
        "count" => return Ok(Aggregator::Count),
        "avg" => return Ok(Aggregator::Avg),
        "min" => return Ok(Aggregator::Min),
        "max" => return Ok(Aggregator::Max),
        "med" => return Ok(Aggregator::Med),
        "" => return Err(ParseThresholdError("missing aggregator".to_string())),
        _ => {}
    }

    let args = s
        .strip_prefix("p(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| ParseThresholdError(format!("unknown aggregator `{s}`")))?;

    let p: f64 = args
        .trim()
        .parse()
        .map_err(|_| ParseThresholdError(format!("`{args}` is not a percentile")))?;

    if p > 0. && p <= 100. {
        Ok(Aggregator::Percentile(p))
    } else {
        Err(ParseThresholdError(format!(
            "percentile {p} is outside (0, 100]"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_percentile() {
        let expr: ThresholdExpr = "p(99)<1000".parse().unwrap();
        assert_eq!(
            expr,
            ThresholdExpr::new(Aggregator::Percentile(99.), Operator::Lt, 1000.)
        );
    }

    #[test]
    fn parses_with_whitespace() {
        let expr: ThresholdExpr = " rate < 0.1 ".parse().unwrap();
        assert_eq!(expr, ThresholdExpr::new(Aggregator::Rate, Operator::Lt, 0.1));

        let expr: ThresholdExpr = "p( 95.5 ) >= 3".parse().unwrap();
        assert_eq!(
            expr,
            ThresholdExpr::new(Aggregator::Percentile(95.5), Operator::Ge, 3.)
        );
    }

    #[test]
    fn parses_all_operators() {
        let ops = [
            ("count<1", Operator::Lt),
            ("count<=1", Operator::Le),
            ("count>1", Operator::Gt),
            ("count>=1", Operator::Ge),
            ("count==1", Operator::Eq),
            ("count===1", Operator::Eq),
            ("count!=1", Operator::Ne),
        ];
        for (s, op) in ops {
            let expr: ThresholdExpr = s.parse().unwrap();
            assert_eq!(expr.op, op, "{s}");
        }
    }

    #[test]
    fn rejects_garbage() {
        for s in [
            "",
            "p99<1000",
            "p(0)<1",
            "p(101)<1",
            "rate",
            "rate<",
            "rate<abc",
            "<1",
            "rate=>1",
            "latency<1",
        ] {
            assert!(s.parse::<ThresholdExpr>().is_err(), "{s} should not parse");
        }
    }

    #[test]
    fn directionality() {
        let expr: ThresholdExpr = "rate<0.1".parse().unwrap();
        assert!(expr.holds(0.05));
        assert!(!expr.holds(0.15));
        assert!(!expr.holds(1.0));
    }

    #[test]
    fn display_round_trips() {
        let expr: ThresholdExpr = "p(99) < 1000".parse().unwrap();
        assert_eq!(expr.to_string(), "p(99)<1000");
        assert_eq!(expr.to_string().parse::<ThresholdExpr>().unwrap(), expr);
    }

    #[test]
    fn aggregator_kinds() {
        assert!(Aggregator::Rate.applies_to(MetricKind::Rate));
        assert!(!Aggregator::Rate.applies_to(MetricKind::Trend));
        assert!(Aggregator::Percentile(99.).applies_to(MetricKind::Trend));
        assert!(!Aggregator::Percentile(99.).applies_to(MetricKind::Counter));
        assert!(Aggregator::Count.applies_to(MetricKind::Counter));
    }
}
