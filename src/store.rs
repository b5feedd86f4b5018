//! Normalized in-memory device state.
//!
//! The vendor API describes device state as a list of tagged items
//! (`{"id": "ZoneComfortTemp", "zn": 1, "value": 21.5, "min": ..., ...}`) for
//! Galevo plants, and as flat objects (`{"reqTemp": 50, "eco": false}`) for the
//! single-tank lines. Both shapes are decoded here into [`PropertyItem`]s keyed
//! by `(PropertyId, zone)`. Ids the crate does not know are dropped at decode
//! time, so every key held by a [`PropertyStore`] is a typed [`PropertyId`].

use chrono::{DateTime, NaiveDateTime};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::models::ariston::{DEVICE_ZONE, ZoneNumber};

/// Declares `PropertyId` with its wire spelling.
macro_rules! property_ids {
    ($($variant:ident => $wire:literal),+ $(,)?) => {
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum PropertyId {
            $($variant),+
        }

        impl PropertyId {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(PropertyId::$variant => $wire),+
                }
            }

            pub fn from_wire(s: &str) -> Option<Self> {
                match s {
                    $($wire => Some(PropertyId::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

property_ids! {
    // Galevo zone items
    ZoneMeasuredTemp => "ZoneMeasuredTemp",
    ZoneDesiredTemp => "ZoneDesiredTemp",
    ZoneComfortTemp => "ZoneComfortTemp",
    ZoneEconomyTemp => "ZoneEconomyTemp",
    ZoneMode => "ZoneMode",
    ZoneHeatRequest => "ZoneHeatRequest",
    // Galevo device-wide items
    PlantMode => "PlantMode",
    IsFlameOn => "IsFlameOn",
    Holiday => "Holiday",
    OutsideTemp => "OutsideTemp",
    HeatingCircuitPressure => "HeatingCircuitPressure",
    ChFlowSetpointTemp => "ChFlowSetpointTemp",
    ChFlowTemp => "ChFlowTemp",
    DhwTemp => "DhwTemp",
    DhwMode => "DhwMode",
    DhwStorageTemperature => "DhwStorageTemperature",
    AutomaticThermoregulation => "AutomaticThermoregulation",
    // single-tank plant data
    Mode => "mode",
    On => "on",
    HeatRequest => "heatReq",
    AverageShowers => "avShw",
    Temp => "temp",
    ReqTemp => "reqTemp",
    ProcReqTemp => "procReqTemp",
    Eco => "eco",
    RemainingTime => "rmTm",
    // MED plant settings
    MedAntilegionellaOnOff => "MedAntilegionellaOnOff",
    MedHeatingRate => "MedHeatingRate",
    MedMaxSetpointTemperature => "MedMaxSetpointTemperature",
    MedMaxSetpointTemperatureMax => "MedMaxSetpointTemperatureMax",
    MedMaxSetpointTemperatureMin => "MedMaxSetpointTemperatureMin",
    // SE plant settings
    SeAntilegionellaOnOff => "SeAntilegionellaOnOff",
    SeMaxSetpointTemperature => "SeMaxSetpointTemperature",
    SeMaxSetpointTemperatureMax => "SeMaxSetpointTemperatureMax",
    SeMaxSetpointTemperatureMin => "SeMaxSetpointTemperatureMin",
}

impl core::fmt::Display for PropertyId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar carried in an item's `value` slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl PropertyValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Integer(i) => Some(*i as f64),
            PropertyValue::Number(n) => Some(*n),
            PropertyValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            PropertyValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            PropertyValue::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            PropertyValue::Number(_) => None,
            PropertyValue::Bool(b) => Some(i64::from(*b)),
            PropertyValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            PropertyValue::Integer(i) => Some(*i != 0),
            PropertyValue::Number(n) => Some(*n != 0.0),
            PropertyValue::Text(s) => match s.trim() {
                "true" | "True" | "1" => Some(true),
                "false" | "False" | "0" => Some(false),
                _ => None,
            },
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

/// One `(id, zone)` record of a device snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyItem {
    pub id: PropertyId,
    pub zone: ZoneNumber,
    pub value: Option<PropertyValue>,
    pub unit: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub decimals: Option<u32>,
    pub options: Vec<i64>,
    pub option_labels: Vec<String>,
    pub expires_on: Option<NaiveDateTime>,
}

impl PropertyItem {
    pub fn new(id: PropertyId, zone: ZoneNumber, value: impl Into<PropertyValue>) -> Self {
        PropertyItem::bare(id, zone, Some(value.into()))
    }

    /// Item without metadata, as produced by the single-tank flat objects.
    pub fn bare(id: PropertyId, zone: ZoneNumber, value: Option<PropertyValue>) -> Self {
        PropertyItem {
            id,
            zone,
            value,
            unit: None,
            min: None,
            max: None,
            step: None,
            decimals: None,
            options: Vec::new(),
            option_labels: Vec::new(),
            expires_on: None,
        }
    }
}

/// Selects one slot of a [`PropertyItem`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Field {
    Value,
    Unit,
    Min,
    Max,
    Step,
    Decimals,
    Options,
    OptionLabels,
    ExpiresOn,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(PropertyValue),
    Text(String),
    Number(f64),
    Integer(i64),
    Codes(Vec<i64>),
    Labels(Vec<String>),
    Timestamp(NaiveDateTime),
}

/// `{"items": [...]}` payload of the items API.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemsPayload {
    #[serde(default)]
    pub items: Vec<WireItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireItem {
    pub id: String,
    #[serde(rename = "zn", alias = "zone", default)]
    pub zone: ZoneNumber,
    #[serde(default)]
    pub value: Option<PropertyValue>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub step: Option<f64>,
    #[serde(default)]
    pub decimals: Option<u32>,
    #[serde(default)]
    pub options: Option<Vec<i64>>,
    #[serde(default)]
    pub opt_texts: Option<Vec<String>>,
    #[serde(default, deserialize_with = "deserialize_expiry")]
    pub expires_on: Option<NaiveDateTime>,
}

impl ItemsPayload {
    /// Converts wire items, dropping ids this crate does not model.
    pub fn into_items(self) -> Vec<PropertyItem> {
        self.items
            .into_iter()
            .filter_map(|w| {
                let Some(id) = PropertyId::from_wire(&w.id) else {
                    debug!("Ignoring unknown item id {} (zone {})", w.id, w.zone);
                    return None;
                };
                Some(PropertyItem {
                    id,
                    zone: w.zone,
                    value: w.value,
                    unit: w.unit,
                    min: w.min,
                    max: w.max,
                    step: w.step,
                    decimals: w.decimals,
                    options: w.options.unwrap_or_default(),
                    option_labels: w.opt_texts.unwrap_or_default(),
                    expires_on: w.expires_on,
                })
            })
            .collect()
    }
}

/// Parses the server's expiry timestamps (`2024-08-01T00:00:00`, optionally
/// with fractional seconds or an RFC 3339 offset).
pub fn parse_expiry(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc()))
}

pub fn format_expiry(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn deserialize_expiry<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => parse_expiry(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid expiry timestamp: {s}"))),
    }
}

/// Snapshot of one device's properties, keyed by `(id, zone)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyStore {
    items: BTreeMap<(PropertyId, ZoneNumber), PropertyItem>,
}

impl PropertyStore {
    pub fn new() -> Self {
        PropertyStore::default()
    }

    pub fn from_items(items: Vec<PropertyItem>) -> Self {
        let mut store = PropertyStore::new();
        store.replace_all(items);
        store
    }

    /// Normalizes a flat single-tank object into device-zone items.
    pub fn from_flat_object(object: &Map<String, Value>) -> Self {
        let items = object
            .iter()
            .filter_map(|(key, raw)| {
                let id = PropertyId::from_wire(key)?;
                match serde_json::from_value::<Option<PropertyValue>>(raw.clone()) {
                    Ok(value) => Some(PropertyItem::bare(id, DEVICE_ZONE, value)),
                    Err(_) => {
                        debug!("Ignoring non-scalar value for {}", key);
                        None
                    }
                }
            })
            .collect();
        PropertyStore::from_items(items)
    }

    /// Drops the current snapshot and installs `items`.
    pub fn replace_all(&mut self, items: Vec<PropertyItem>) {
        self.items.clear();
        for item in items {
            self.items.insert((item.id, item.zone), item);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: PropertyId, zone: ZoneNumber) -> bool {
        self.items.contains_key(&(id, zone))
    }

    pub fn item(&self, id: PropertyId, zone: ZoneNumber) -> Option<&PropertyItem> {
        self.items.get(&(id, zone))
    }

    pub fn items(&self) -> impl Iterator<Item = &PropertyItem> {
        self.items.values()
    }

    pub fn get(&self, id: PropertyId, zone: ZoneNumber, field: Field) -> Option<FieldValue> {
        let item = self.item(id, zone)?;
        match field {
            Field::Value => item.value.clone().map(FieldValue::Value),
            Field::Unit => item.unit.clone().map(FieldValue::Text),
            Field::Min => item.min.map(FieldValue::Number),
            Field::Max => item.max.map(FieldValue::Number),
            Field::Step => item.step.map(FieldValue::Number),
            Field::Decimals => item.decimals.map(|d| FieldValue::Integer(i64::from(d))),
            Field::Options => Some(FieldValue::Codes(item.options.clone())),
            Field::OptionLabels => Some(FieldValue::Labels(item.option_labels.clone())),
            Field::ExpiresOn => item.expires_on.map(FieldValue::Timestamp),
        }
    }

    pub fn value(&self, id: PropertyId, zone: ZoneNumber) -> Option<&PropertyValue> {
        self.item(id, zone).and_then(|i| i.value.as_ref())
    }

    pub fn number(&self, id: PropertyId, zone: ZoneNumber) -> Option<f64> {
        self.value(id, zone).and_then(PropertyValue::as_f64)
    }

    pub fn code(&self, id: PropertyId, zone: ZoneNumber) -> Option<i64> {
        self.value(id, zone).and_then(PropertyValue::as_i64)
    }

    pub fn flag(&self, id: PropertyId, zone: ZoneNumber) -> Option<bool> {
        self.value(id, zone).and_then(PropertyValue::as_bool)
    }

    pub fn text(&self, id: PropertyId, zone: ZoneNumber) -> Option<&str> {
        self.value(id, zone).and_then(PropertyValue::as_str)
    }

    pub fn expires_on(&self, id: PropertyId, zone: ZoneNumber) -> Option<NaiveDateTime> {
        self.item(id, zone).and_then(|i| i.expires_on)
    }

    pub fn unit(&self, id: PropertyId, zone: ZoneNumber) -> Option<&str> {
        self.item(id, zone).and_then(|i| i.unit.as_deref())
    }

    pub fn options(&self, id: PropertyId, zone: ZoneNumber) -> &[i64] {
        self.item(id, zone).map(|i| i.options.as_slice()).unwrap_or(&[])
    }

    pub fn option_labels(&self, id: PropertyId, zone: ZoneNumber) -> &[String] {
        self.item(id, zone).map(|i| i.option_labels.as_slice()).unwrap_or(&[])
    }

    /// Writes one slot of an existing item. `None` clears the slot.
    ///
    /// Returns `false` when the key is absent or `value` does not fit `field`;
    /// the store is unchanged in that case.
    pub fn set_local(
        &mut self,
        id: PropertyId,
        zone: ZoneNumber,
        field: Field,
        value: Option<FieldValue>,
    ) -> bool {
        let Some(item) = self.items.get_mut(&(id, zone)) else {
            return false;
        };
        match (field, value) {
            (Field::Value, None) => item.value = None,
            (Field::Value, Some(FieldValue::Value(v))) => item.value = Some(v),
            (Field::Unit, None) => item.unit = None,
            (Field::Unit, Some(FieldValue::Text(t))) => item.unit = Some(t),
            (Field::Min, v @ (None | Some(FieldValue::Number(_)))) => item.min = number_of(v),
            (Field::Max, v @ (None | Some(FieldValue::Number(_)))) => item.max = number_of(v),
            (Field::Step, v @ (None | Some(FieldValue::Number(_)))) => item.step = number_of(v),
            (Field::Decimals, None) => item.decimals = None,
            (Field::Decimals, Some(FieldValue::Integer(d))) => item.decimals = u32::try_from(d).ok(),
            (Field::Options, None) => item.options.clear(),
            (Field::Options, Some(FieldValue::Codes(c))) => item.options = c,
            (Field::OptionLabels, None) => item.option_labels.clear(),
            (Field::OptionLabels, Some(FieldValue::Labels(l))) => item.option_labels = l,
            (Field::ExpiresOn, None) => item.expires_on = None,
            (Field::ExpiresOn, Some(FieldValue::Timestamp(ts))) => item.expires_on = Some(ts),
            (field, Some(other)) => {
                debug!("Refusing to store {:?} into {:?} of {} (zone {})", other, field, id, zone);
                return false;
            }
        }
        true
    }

    /// Shorthand for replacing an item's value.
    pub fn set_value(&mut self, id: PropertyId, zone: ZoneNumber, value: impl Into<PropertyValue>) -> bool {
        self.set_local(id, zone, Field::Value, Some(FieldValue::Value(value.into())))
    }
}

fn number_of(value: Option<FieldValue>) -> Option<f64> {
    match value {
        Some(FieldValue::Number(n)) => Some(n),
        _ => None,
    }
}
