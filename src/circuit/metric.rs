//! Event categories counted per rolling-window bucket.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Success,
    Failure,
    Timeout,
    ShortCircuited,
    FallbackSuccess,
    FallbackFailure,
    ExceptionThrown,
    ResponseFromCache,
}

impl MetricType {
    pub const ALL: [MetricType; 8] = [
        MetricType::Success,
        MetricType::Failure,
        MetricType::Timeout,
        MetricType::ShortCircuited,
        MetricType::FallbackSuccess,
        MetricType::FallbackFailure,
        MetricType::ExceptionThrown,
        MetricType::ResponseFromCache,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Success => "success",
            MetricType::Failure => "failure",
            MetricType::Timeout => "timeout",
            MetricType::ShortCircuited => "short_circuited",
            MetricType::FallbackSuccess => "fallback_success",
            MetricType::FallbackFailure => "fallback_failure",
            MetricType::ExceptionThrown => "exception_thrown",
            MetricType::ResponseFromCache => "response_from_cache",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricType::ALL
            .into_iter()
            .find(|metric| metric.as_str() == s)
            .ok_or_else(|| format!("unknown metric type: {}", s))
    }
}
