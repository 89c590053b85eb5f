//! Processing configuration.
//!
//! [`CounterConfig`] is the single value a processing pass reads. It can be
//! deserialised from JSON or built from the raw text of a parameter form
//! ([`ConfigForm`]), in which case every numeric field is parsed strictly:
//! a field that is not a number fails the whole conversion instead of falling
//! back to a default.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, parse_number};

/// Catalogue of histogram based global threshold methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GlobalMethod {
    Default,
    Huang,
    Intermodes,
    IsoData,
    #[serde(rename = "IJ_IsoData")]
    IjIsoData,
    Li,
    MaxEntropy,
    Mean,
    MinError,
    Minimum,
    Moments,
    Otsu,
    Percentile,
    RenyiEntropy,
    Shanbhag,
    Triangle,
    Yen,
}

impl GlobalMethod {
    pub const ALL: [GlobalMethod; 17] = [
        GlobalMethod::Default,
        GlobalMethod::Huang,
        GlobalMethod::Intermodes,
        GlobalMethod::IsoData,
        GlobalMethod::IjIsoData,
        GlobalMethod::Li,
        GlobalMethod::MaxEntropy,
        GlobalMethod::Mean,
        GlobalMethod::MinError,
        GlobalMethod::Minimum,
        GlobalMethod::Moments,
        GlobalMethod::Otsu,
        GlobalMethod::Percentile,
        GlobalMethod::RenyiEntropy,
        GlobalMethod::Shanbhag,
        GlobalMethod::Triangle,
        GlobalMethod::Yen,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GlobalMethod::Default => "Default",
            GlobalMethod::Huang => "Huang",
            GlobalMethod::Intermodes => "Intermodes",
            GlobalMethod::IsoData => "IsoData",
            GlobalMethod::IjIsoData => "IJ_IsoData",
            GlobalMethod::Li => "Li",
            GlobalMethod::MaxEntropy => "MaxEntropy",
            GlobalMethod::Mean => "Mean",
            GlobalMethod::MinError => "MinError",
            GlobalMethod::Minimum => "Minimum",
            GlobalMethod::Moments => "Moments",
            GlobalMethod::Otsu => "Otsu",
            GlobalMethod::Percentile => "Percentile",
            GlobalMethod::RenyiEntropy => "RenyiEntropy",
            GlobalMethod::Shanbhag => "Shanbhag",
            GlobalMethod::Triangle => "Triangle",
            GlobalMethod::Yen => "Yen",
        }
    }
}

impl fmt::Display for GlobalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GlobalMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        GlobalMethod::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownMethod(s.to_string()))
    }
}

/// Catalogue of local (windowed) adaptive threshold methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalMethod {
    Bernsen,
    Contrast,
    Mean,
    Median,
    MidGrey,
    Niblack,
    Otsu,
    Phansalkar,
    Sauvola,
}

impl LocalMethod {
    pub const ALL: [LocalMethod; 9] = [
        LocalMethod::Bernsen,
        LocalMethod::Contrast,
        LocalMethod::Mean,
        LocalMethod::Median,
        LocalMethod::MidGrey,
        LocalMethod::Niblack,
        LocalMethod::Otsu,
        LocalMethod::Phansalkar,
        LocalMethod::Sauvola,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LocalMethod::Bernsen => "Bernsen",
            LocalMethod::Contrast => "Contrast",
            LocalMethod::Mean => "Mean",
            LocalMethod::Median => "Median",
            LocalMethod::MidGrey => "MidGrey",
            LocalMethod::Niblack => "Niblack",
            LocalMethod::Otsu => "Otsu",
            LocalMethod::Phansalkar => "Phansalkar",
            LocalMethod::Sauvola => "Sauvola",
        }
    }

    /// Number of extra numeric parameters the method consumes.
    pub fn parameter_count(self) -> usize {
        self.parameter_labels().len()
    }

    /// Labels of the extra parameters, in order.
    pub fn parameter_labels(self) -> &'static [&'static str] {
        match self {
            LocalMethod::Contrast | LocalMethod::Otsu => &[],
            LocalMethod::Bernsen => &["ContrastTh"],
            LocalMethod::Mean | LocalMethod::Median | LocalMethod::MidGrey => &["Offset"],
            LocalMethod::Niblack => &["k value", "Offset"],
            LocalMethod::Phansalkar | LocalMethod::Sauvola => &["k value", "r value"],
        }
    }
}

impl fmt::Display for LocalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LocalMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        LocalMethod::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownMethod(s.to_string()))
    }
}

/// Global auto-threshold after optional high-pass and median filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalThreshold {
    pub method: GlobalMethod,
    /// Gaussian high-pass sigma in calibrated units, `0` disables.
    pub sigma: f64,
    /// Median filter radius in pixels, `0` disables.
    pub median_radius: f64,
    pub ignore_black: bool,
    pub ignore_white: bool,
}

impl Default for GlobalThreshold {
    fn default() -> Self {
        Self {
            method: GlobalMethod::Default,
            sigma: 10.0,
            median_radius: 3.0,
            ignore_black: true,
            ignore_white: false,
        }
    }
}

/// Local adaptive threshold after optional high-pass and median filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalThreshold {
    pub method: LocalMethod,
    pub sigma: f64,
    pub median_radius: f64,
    /// Half width of the local window, in pixels.
    pub radius: f64,
    /// Exactly [`LocalMethod::parameter_count`] values. `0` selects the
    /// method's own default.
    pub parameters: Vec<f64>,
}

impl Default for LocalThreshold {
    fn default() -> Self {
        Self::with_method(LocalMethod::Bernsen)
    }
}

impl LocalThreshold {
    pub fn with_method(method: LocalMethod) -> Self {
        Self {
            method,
            sigma: 10.0,
            median_radius: 3.0,
            radius: 10.0,
            parameters: vec![0.0; method.parameter_count()],
        }
    }

    /// Switches method, resetting the extra parameters to the new method's arity.
    pub fn set_method(&mut self, method: LocalMethod) {
        self.method = method;
        self.parameters = vec![0.0; method.parameter_count()];
    }
}

/// Two band high-pass composite, see [`crate::threshold`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualBandThreshold {
    pub low_sigma: f64,
    pub high_sigma: f64,
}

impl Default for DualBandThreshold {
    fn default() -> Self {
        Self {
            low_sigma: 5.0,
            high_sigma: 15.0,
        }
    }
}

/// Names the three threshold strategies without their parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Global,
    Local,
    DualBand,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::Global,
        StrategyKind::Local,
        StrategyKind::DualBand,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::Global => "Auto Threshold",
            StrategyKind::Local => "Auto Local Threshold",
            StrategyKind::DualBand => "Dual-Band Threshold",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        StrategyKind::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownMethod(s.to_string()))
    }
}

/// Exactly one threshold strategy with its own parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy")]
pub enum ThresholdConfig {
    Global(GlobalThreshold),
    Local(LocalThreshold),
    DualBand(DualBandThreshold),
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        ThresholdConfig::Global(GlobalThreshold::default())
    }
}

impl ThresholdConfig {
    /// Fresh default parameters for `kind`. Nothing carries over from a
    /// previously selected strategy.
    pub fn default_for(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Global => ThresholdConfig::Global(GlobalThreshold::default()),
            StrategyKind::Local => ThresholdConfig::Local(LocalThreshold::default()),
            StrategyKind::DualBand => ThresholdConfig::DualBand(DualBandThreshold::default()),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            ThresholdConfig::Global(_) => StrategyKind::Global,
            ThresholdConfig::Local(_) => StrategyKind::Local,
            ThresholdConfig::DualBand(_) => StrategyKind::DualBand,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ThresholdConfig::Global(g) => {
                non_negative("sigma", g.sigma)?;
                non_negative("median_radius", g.median_radius)
            }
            ThresholdConfig::Local(l) => {
                non_negative("sigma", l.sigma)?;
                non_negative("median_radius", l.median_radius)?;
                if !(l.radius >= 1.0) {
                    return Err(Error::OutOfRange {
                        field: "radius",
                        reason: format!("{} is below 1 pixel", l.radius),
                    });
                }
                if l.parameters.len() != l.method.parameter_count() {
                    return Err(Error::ParameterCount {
                        method: l.method.to_string(),
                        expected: l.method.parameter_count(),
                        found: l.parameters.len(),
                    });
                }
                match l.parameters.iter().find(|p| !p.is_finite()) {
                    Some(p) => Err(Error::OutOfRange {
                        field: "parameters",
                        reason: format!("{p} is not finite"),
                    }),
                    None => Ok(()),
                }
            }
            ThresholdConfig::DualBand(d) => {
                positive("low_sigma", d.low_sigma)?;
                positive("high_sigma", d.high_sigma)
            }
        }
    }
}

/// Parameter summary written next to every result row.
impl fmt::Display for ThresholdConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind().name())?;
        match self {
            ThresholdConfig::Global(g) => write!(
                f,
                ";GaussianSigma:{};MedianRadius:{};AutoThMethod:{}",
                g.sigma, g.median_radius, g.method
            ),
            ThresholdConfig::Local(l) => {
                write!(
                    f,
                    ";GaussianSigma:{};MedianRadius:{};LocalThRadius:{};LocalThMethod:{}",
                    l.sigma, l.median_radius, l.radius, l.method
                )?;
                for (label, value) in l.method.parameter_labels().iter().zip(&l.parameters) {
                    write!(f, ";{label}:{value}")?;
                }
                Ok(())
            }
            ThresholdConfig::DualBand(d) => write!(
                f,
                ";GaussianSigma1:{};GaussianSigma2:{}",
                d.low_sigma, d.high_sigma
            ),
        }
    }
}

fn non_negative(field: &'static str, v: f64) -> Result<()> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(Error::OutOfRange {
            field,
            reason: format!("{v} is negative"),
        })
    }
}

fn positive(field: &'static str, v: f64) -> Result<()> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(Error::OutOfRange {
            field,
            reason: format!("{v} must be greater than 0"),
        })
    }
}

/// An inclusive `min-max` range. A missing upper bound means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: Option<f64>,
}

impl Bounds {
    pub fn new(min: f64, max: Option<f64>) -> Self {
        Self { min, max }
    }

    pub fn upper(&self) -> f64 {
        self.max.unwrap_or(f64::INFINITY)
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.upper()
    }

    /// Parses `"min"` or `"min-max"`.
    pub fn parse(field: &'static str, text: &str) -> Result<Self> {
        let mut parts = text.split('-');
        let min = parse_number(field, parts.next().unwrap_or_default())?;
        let max = parts.next().map(|p| parse_number(field, p)).transpose()?;
        if parts.next().is_some() {
            return Err(Error::NotANumber {
                field,
                value: text.to_string(),
            });
        }
        let bounds = Self { min, max };
        if bounds.min < 0.0 || bounds.min > bounds.upper() {
            return Err(Error::OutOfRange {
                field,
                reason: format!("`{text}` is not an ascending non-negative range"),
            });
        }
        Ok(bounds)
    }
}

/// Which side of the intensity range holds the background.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Background {
    #[default]
    Dark,
    White,
}

/// Everything one processing pass needs apart from the pixels themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    /// Raster plane to analyse.
    pub plane: usize,
    pub threshold: ThresholdConfig,
    /// Accepted cell area in calibrated units².
    pub cell_area: Bounds,
    pub circularity: Bounds,
    /// Duplicate distance in calibrated units, `0` disables suppression.
    pub min_distance: f64,
    pub background: Background,
    /// Associate cells with a reference (nucleus) region set.
    pub cross_channel: bool,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            plane: 0,
            threshold: ThresholdConfig::default(),
            cell_area: Bounds::new(1.0, Some(100.0)),
            circularity: Bounds::new(0.0, Some(1.0)),
            min_distance: 10.0,
            background: Background::Dark,
            cross_channel: false,
        }
    }
}

impl CounterConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CounterConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.threshold.validate()?;
        if self.cell_area.min < 0.0 || self.cell_area.min > self.cell_area.upper() {
            return Err(Error::OutOfRange {
                field: "cell_area",
                reason: format!("{:?} is not an ascending range", self.cell_area),
            });
        }
        if self.circularity.min < 0.0
            || self.circularity.upper() > 1.0
            || self.circularity.min > self.circularity.upper()
        {
            return Err(Error::OutOfRange {
                field: "circularity",
                reason: format!("{:?} is not within 0-1", self.circularity),
            });
        }
        non_negative("min_distance", self.min_distance)
    }
}

/// Raw text of the parameter form, one string per field.
///
/// Only the fields of the selected strategy are parsed, so text left behind in
/// the other strategies' fields never leaks into the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigForm {
    pub plane: String,
    pub strategy: String,
    pub global_method: String,
    pub global_sigma: String,
    pub global_median_radius: String,
    pub ignore_black: bool,
    pub ignore_white: bool,
    pub local_method: String,
    pub local_sigma: String,
    pub local_median_radius: String,
    pub local_radius: String,
    pub local_parameters: [String; 2],
    pub dual_low_sigma: String,
    pub dual_high_sigma: String,
    pub cell_area: String,
    pub circularity: String,
    pub min_distance: String,
    pub white_background: bool,
    pub cross_channel: bool,
}

impl Default for ConfigForm {
    fn default() -> Self {
        Self {
            plane: "0".into(),
            strategy: StrategyKind::Global.name().into(),
            global_method: GlobalMethod::Default.name().into(),
            global_sigma: "10".into(),
            global_median_radius: "3".into(),
            ignore_black: true,
            ignore_white: false,
            local_method: LocalMethod::Bernsen.name().into(),
            local_sigma: "10".into(),
            local_median_radius: "3".into(),
            local_radius: "10".into(),
            local_parameters: ["0".into(), "0".into()],
            dual_low_sigma: "5".into(),
            dual_high_sigma: "15".into(),
            cell_area: "1-100".into(),
            circularity: "0.00-1.00".into(),
            min_distance: "10".into(),
            white_background: false,
            cross_channel: false,
        }
    }
}

impl TryFrom<&ConfigForm> for CounterConfig {
    type Error = Error;

    fn try_from(form: &ConfigForm) -> Result<Self> {
        let threshold = match form.strategy.parse::<StrategyKind>()? {
            StrategyKind::Global => ThresholdConfig::Global(GlobalThreshold {
                method: form.global_method.parse()?,
                sigma: parse_number("global_sigma", &form.global_sigma)?,
                median_radius: parse_number("global_median_radius", &form.global_median_radius)?,
                ignore_black: form.ignore_black,
                ignore_white: form.ignore_white,
            }),
            StrategyKind::Local => {
                let method: LocalMethod = form.local_method.parse()?;
                let parameters = form.local_parameters[..method.parameter_count()]
                    .iter()
                    .map(|p| parse_number("local_parameters", p))
                    .collect::<Result<Vec<_>>>()?;
                ThresholdConfig::Local(LocalThreshold {
                    method,
                    sigma: parse_number("local_sigma", &form.local_sigma)?,
                    median_radius: parse_number("local_median_radius", &form.local_median_radius)?,
                    radius: parse_number("local_radius", &form.local_radius)?,
                    parameters,
                })
            }
            StrategyKind::DualBand => ThresholdConfig::DualBand(DualBandThreshold {
                low_sigma: parse_number("dual_low_sigma", &form.dual_low_sigma)?,
                high_sigma: parse_number("dual_high_sigma", &form.dual_high_sigma)?,
            }),
        };

        let plane = parse_number("plane", &form.plane)?;
        if plane < 0.0 || plane.fract() != 0.0 {
            return Err(Error::OutOfRange {
                field: "plane",
                reason: format!("{plane} is not a plane index"),
            });
        }

        let config = CounterConfig {
            plane: plane as usize,
            threshold,
            cell_area: Bounds::parse("cell_area", &form.cell_area)?,
            circularity: Bounds::parse("circularity", &form.circularity)?,
            min_distance: parse_number("min_distance", &form.min_distance)?,
            background: if form.white_background {
                Background::White
            } else {
                Background::Dark
            },
            cross_channel: form.cross_channel,
        };
        config.validate()?;
        Ok(config)
    }
}
