use std::{collections::BTreeMap, fmt};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::BatchError;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Value of a job parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    String(String),
    Long(i64),
    Double(f64),
    Date(NaiveDate),
}

impl ParameterValue {
    fn type_name(&self) -> &'static str {
        match self {
            ParameterValue::String(_) => "string",
            ParameterValue::Long(_) => "long",
            ParameterValue::Double(_) => "double",
            ParameterValue::Date(_) => "date",
        }
    }

    fn parse(type_name: &str, raw: &str) -> Result<Self, BatchError> {
        let invalid = |error: String| {
            BatchError::Configuration(format!("invalid {} value {:?}: {}", type_name, raw, error))
        };

        match type_name {
            "string" => Ok(ParameterValue::String(raw.to_string())),
            "long" => raw
                .parse()
                .map(ParameterValue::Long)
                .map_err(|e| invalid(e.to_string())),
            "double" => raw
                .parse()
                .map(ParameterValue::Double)
                .map_err(|e| invalid(e.to_string())),
            "date" => NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .map(ParameterValue::Date)
                .map_err(|e| invalid(e.to_string())),
            other => Err(BatchError::Configuration(format!(
                "unknown parameter type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::String(value) => write!(f, "{}", value),
            ParameterValue::Long(value) => write!(f, "{}", value),
            ParameterValue::Double(value) => write!(f, "{}", value),
            ParameterValue::Date(value) => write!(f, "{}", value.format(DATE_FORMAT)),
        }
    }
}

/// A job parameter and whether it takes part in identifying the job instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    value: ParameterValue,
    identifying: bool,
}

impl JobParameter {
    pub fn new(value: ParameterValue) -> Self {
        Self {
            value,
            identifying: true,
        }
    }

    /// A parameter passed to the job that does not distinguish job instances.
    pub fn non_identifying(value: ParameterValue) -> Self {
        Self {
            value,
            identifying: false,
        }
    }

    pub fn value(&self) -> &ParameterValue {
        &self.value
    }

    pub fn is_identifying(&self) -> bool {
        self.identifying
    }
}

/// Named values a job is launched with.
///
/// Identifying parameters, together with the job name, define the job
/// instance: launching the same job twice with the same identifying
/// parameters targets the same instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses command-line style arguments.
    ///
    /// Accepted forms are `key=value` (string), `key(type)=value` with type
    /// `string`, `long`, `double` or `date` (`YYYY-MM-DD`), and any of these
    /// prefixed with `-` to pass a non-identifying parameter.
    ///
    /// # Examples
    ///
    /// ```
    /// use batch_etl::core::parameters::JobParameters;
    ///
    /// let parameters =
    ///     JobParameters::from_args(["input=people.csv", "run.id(long)=3", "-verbose=yes"]).unwrap();
    ///
    /// assert_eq!(parameters.get_string("input"), Some("people.csv"));
    /// assert_eq!(parameters.get_long("run.id"), Some(3));
    /// assert!(!parameters.get("verbose").unwrap().is_identifying());
    /// ```
    pub fn from_args<I, S>(args: I) -> Result<Self, BatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parameters = JobParameters::new();

        for arg in args {
            let arg = arg.as_ref().trim();
            if arg.is_empty() {
                continue;
            }

            let (identifying, arg) = match arg.strip_prefix('-') {
                Some(rest) => (false, rest),
                None => (true, arg),
            };

            let (key, raw) = arg.split_once('=').ok_or_else(|| {
                BatchError::Configuration(format!("expected key=value, got {:?}", arg))
            })?;

            let (name, type_name) = match key.strip_suffix(')').and_then(|k| k.split_once('(')) {
                Some((name, type_name)) => (name, type_name),
                None => (key, "string"),
            };

            if name.is_empty() {
                return Err(BatchError::Configuration(format!(
                    "missing parameter name in {:?}",
                    arg
                )));
            }

            let value = ParameterValue::parse(type_name, raw)?;
            parameters.insert(name, JobParameter { value, identifying });
        }

        Ok(parameters)
    }

    pub fn insert(&mut self, key: &str, parameter: JobParameter) {
        self.parameters.insert(key.to_string(), parameter);
    }

    pub fn get(&self, key: &str) -> Option<&JobParameter> {
        self.parameters.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.get(key).map(JobParameter::value) {
            Some(ParameterValue::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.get(key).map(JobParameter::value) {
            Some(ParameterValue::Long(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.get(key).map(JobParameter::value) {
            Some(ParameterValue::Double(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_date(&self, key: &str) -> Option<NaiveDate> {
        match self.get(key).map(JobParameter::value) {
            Some(ParameterValue::Date(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobParameter)> {
        self.parameters.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Returns these parameters overridden by the ones of `other`.
    pub fn merge(&self, other: &JobParameters) -> JobParameters {
        let mut merged = self.clone();
        for (key, parameter) in &other.parameters {
            merged.parameters.insert(key.clone(), parameter.clone());
        }
        merged
    }

    /// Whether every identifying parameter of `other` is present here with the same value.
    pub fn contains_identifying(&self, other: &JobParameters) -> bool {
        other
            .parameters
            .iter()
            .filter(|(_, p)| p.identifying)
            .all(|(key, p)| self.get(key).is_some_and(|own| own.value == p.value))
    }

    /// Only the identifying parameters.
    pub fn identifying(&self) -> JobParameters {
        JobParameters {
            parameters: self
                .parameters
                .iter()
                .filter(|(_, p)| p.identifying)
                .map(|(key, p)| (key.clone(), p.clone()))
                .collect(),
        }
    }

    /// Canonical representation of the identifying parameters.
    ///
    /// Two parameter sets share a key exactly when their identifying
    /// parameters have the same names, types and values. The key is the JSON
    /// object of those parameters, so names and values are escaped.
    pub fn identity_key(&self) -> Result<String, BatchError> {
        let identifying: BTreeMap<&str, &ParameterValue> = self
            .parameters
            .iter()
            .filter(|(_, p)| p.identifying)
            .map(|(key, p)| (key.as_str(), &p.value))
            .collect();

        serde_json::to_string(&identifying)
            .map_err(|e| BatchError::JobRepository(format!("unable to encode parameters: {}", e)))
    }
}

impl fmt::Display for JobParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .parameters
            .iter()
            .map(|(key, p)| format!("{}={}", key, p.value))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}", rendered)
    }
}

/// Fluent construction of [`JobParameters`].
#[derive(Default)]
pub struct JobParametersBuilder {
    parameters: JobParameters,
}

impl JobParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_string(mut self, key: &str, value: &str) -> Self {
        self.parameters.insert(
            key,
            JobParameter::new(ParameterValue::String(value.to_string())),
        );
        self
    }

    pub fn add_long(mut self, key: &str, value: i64) -> Self {
        self.parameters
            .insert(key, JobParameter::new(ParameterValue::Long(value)));
        self
    }

    pub fn add_double(mut self, key: &str, value: f64) -> Self {
        self.parameters
            .insert(key, JobParameter::new(ParameterValue::Double(value)));
        self
    }

    pub fn add_date(mut self, key: &str, value: NaiveDate) -> Self {
        self.parameters
            .insert(key, JobParameter::new(ParameterValue::Date(value)));
        self
    }

    pub fn add_parameter(mut self, key: &str, parameter: JobParameter) -> Self {
        self.parameters.insert(key, parameter);
        self
    }

    pub fn build(self) -> JobParameters {
        self.parameters
    }
}

/// Computes the parameters of the next run of a job from those of its previous run.
pub trait JobParametersIncrementer {
    fn next(&self, previous: Option<&JobParameters>) -> JobParameters;
}

/// Increments a long parameter (`run.id` by default) so each launch targets a new job instance.
pub struct RunIdIncrementer {
    key: String,
}

impl RunIdIncrementer {
    pub const DEFAULT_KEY: &'static str = "run.id";

    pub fn new() -> Self {
        Self::with_key(Self::DEFAULT_KEY)
    }

    pub fn with_key(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }
}

impl Default for RunIdIncrementer {
    fn default() -> Self {
        Self::new()
    }
}

impl JobParametersIncrementer for RunIdIncrementer {
    fn next(&self, previous: Option<&JobParameters>) -> JobParameters {
        let mut parameters = previous.cloned().unwrap_or_default();
        let run_id = parameters.get_long(&self.key).unwrap_or(0) + 1;
        parameters.insert(&self.key, JobParameter::new(ParameterValue::Long(run_id)));
        parameters
    }
}
