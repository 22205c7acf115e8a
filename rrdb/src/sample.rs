//! Update input: one timestamp and one value per datasource.
//!
//! A [`Sample`] is created by [`RrdDb::create_sample`](crate::RrdDb::create_sample),
//! which fixes the datasource names and count. Values start as NaN
//! (unknown). Samples can also be filled from the classic
//! `time:value:value...` template, where the time `N` means now and a value
//! `U` means unknown.

use crate::error::{DefinitionError, LookupError, Result};
use crate::time;

/// A set of values for one update.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    time: i64,
    ds_names: Vec<String>,
    values: Vec<f64>,
}

impl Sample {
    /// Creates a sample at `time` with every value unknown.
    pub fn new(time: i64, ds_names: Vec<String>) -> Self {
        let values = vec![f64::NAN; ds_names.len()];
        Self {
            time,
            ds_names,
            values,
        }
    }

    /// Sample timestamp.
    pub fn time(&self) -> i64 {
        self.time
    }

    /// Changes the sample timestamp.
    pub fn set_time(&mut self, time: i64) -> &mut Self {
        self.time = time;
        self
    }

    /// Datasource names, in value order.
    pub fn ds_names(&self) -> &[String] {
        &self.ds_names
    }

    /// Values, in datasource order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Sets the value of datasource `index`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::DatasourceIndex`] if `index` is out of range.
    pub fn set_value(&mut self, index: usize, value: f64) -> Result<&mut Self> {
        let count = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or(LookupError::DatasourceIndex { index, count })?;
        *slot = value;
        Ok(self)
    }

    /// Sets the value of the datasource named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Datasource`] if there is no such datasource.
    pub fn set_value_by_name(&mut self, name: &str, value: f64) -> Result<&mut Self> {
        let index = self
            .ds_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| LookupError::Datasource {
                name: name.to_string(),
            })?;
        self.set_value(index, value)
    }

    /// Sets the leading values; datasources beyond `values` keep theirs.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::SampleSize`] if more values than
    /// datasources are supplied.
    pub fn set_values(&mut self, values: &[f64]) -> Result<&mut Self> {
        if values.len() > self.values.len() {
            return Err(DefinitionError::SampleSize {
                expected: self.values.len(),
                actual: values.len(),
            }
            .into());
        }
        self.values[..values.len()].copy_from_slice(values);
        Ok(self)
    }

    /// Resets every value to unknown.
    pub fn clear(&mut self) -> &mut Self {
        self.values.fill(f64::NAN);
        self
    }

    /// Fills the sample from a `time:value:value...` template.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidSample`] if the time or a value
    /// cannot be parsed, or [`DefinitionError::SampleSize`] if there are
    /// more values than datasources.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rrdb::Sample;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let mut sample = Sample::new(0, vec!["in".to_string(), "out".to_string()]);
    /// sample.parse_template("1000:12.5:U")?;
    /// assert_eq!(sample.time(), 1000);
    /// assert_eq!(sample.values()[0], 12.5);
    /// assert!(sample.values()[1].is_nan());
    /// # Ok(())
    /// # }
    /// ```
    pub fn parse_template(&mut self, template: &str) -> Result<&mut Self> {
        let invalid = |reason: String| DefinitionError::InvalidSample {
            template: template.to_string(),
            reason,
        };

        let mut tokens = template.split(':');
        let time_token = tokens.next().unwrap_or_default().trim();
        let time = if time_token.eq_ignore_ascii_case("N") {
            time::now()
        } else {
            time_token
                .parse::<i64>()
                .map_err(|e| invalid(format!("bad timestamp '{time_token}': {e}")))?
        };

        let values = tokens
            .map(|token| {
                let token = token.trim();
                if token.eq_ignore_ascii_case("U") {
                    Ok(f64::NAN)
                } else {
                    token
                        .parse::<f64>()
                        .map_err(|e| invalid(format!("bad value '{token}': {e}")))
                }
            })
            .collect::<std::result::Result<Vec<f64>, DefinitionError>>()?;

        self.set_values(&values)?;
        self.time = time;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RrdError;

    fn sample() -> Sample {
        Sample::new(100, vec!["a".to_string(), "b".to_string(), "c".to_string()])
    }

    #[test]
    fn test_values_default_to_unknown() {
        let sample = sample();
        assert_eq!(sample.time(), 100);
        assert!(sample.values().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_setters() {
        let mut sample = sample();
        sample
            .set_value(0, 1.0)
            .unwrap()
            .set_value_by_name("c", 3.0)
            .unwrap();
        assert_eq!(sample.values()[0], 1.0);
        assert!(sample.values()[1].is_nan());
        assert_eq!(sample.values()[2], 3.0);

        assert!(sample.set_value(3, 1.0).is_err());
        assert!(sample.set_value_by_name("d", 1.0).unwrap_err().is_not_found());

        sample.set_values(&[7.0, 8.0]).unwrap();
        assert_eq!(sample.values(), &[7.0, 8.0, 3.0]);
        assert!(matches!(
            sample.set_values(&[1.0; 4]),
            Err(RrdError::Definition(DefinitionError::SampleSize {
                expected: 3,
                actual: 4
            }))
        ));

        sample.clear().set_time(200);
        assert_eq!(sample.time(), 200);
        assert!(sample.values().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_parse_template() {
        let mut sample = sample();
        sample.parse_template("1500:1:U:-2.5").unwrap();
        assert_eq!(sample.time(), 1500);
        assert_eq!(sample.values()[0], 1.0);
        assert!(sample.values()[1].is_nan());
        assert_eq!(sample.values()[2], -2.5);

        sample.parse_template("N:4").unwrap();
        assert!(sample.time() > 1_577_836_800);

        assert!(sample.parse_template("abc:1").is_err());
        assert!(sample.parse_template("10:x").is_err());
        assert!(sample.parse_template("10:1:2:3:4").is_err());
    }
}
