//! Gadget personalities and the function sets they imply

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use typeshare::typeshare;

/// One advertised USB capability
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsbFunction {
    Network,
    MassStorage,
    Serial,
    Hid,
}

impl UsbFunction {
    const ALL: [UsbFunction; 4] = [
        UsbFunction::Network,
        UsbFunction::MassStorage,
        UsbFunction::Serial,
        UsbFunction::Hid,
    ];

    const fn bit(self) -> u8 {
        match self {
            UsbFunction::Network => 0b0001,
            UsbFunction::MassStorage => 0b0010,
            UsbFunction::Serial => 0b0100,
            UsbFunction::Hid => 0b1000,
        }
    }
}

/// Immutable set of functions bound together in one configuration
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct FunctionSet(u8);

impl FunctionSet {
    pub const EMPTY: FunctionSet = FunctionSet(0);

    pub const fn of(functions: &[UsbFunction]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < functions.len() {
            bits |= functions[i].bit();
            i += 1;
        }
        FunctionSet(bits)
    }

    pub const fn contains(&self, function: UsbFunction) -> bool {
        self.0 & function.bit() != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = UsbFunction> + '_ {
        UsbFunction::ALL.into_iter().filter(|f| self.contains(*f))
    }
}

impl fmt::Debug for FunctionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for FunctionSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// Gadget personality
///
/// Exactly one is active; `Unbound` is the transient state every switch
/// passes through.
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GadgetMode {
    #[default]
    Unbound,
    /// Network + mass storage + serial console
    Multi,
    StorageReadWrite,
    StorageReadOnly,
    NetworkOnly,
    /// Keyboard alone; never combined with the other functions
    HidKeyboard,
}

impl GadgetMode {
    pub const fn functions(self) -> FunctionSet {
        match self {
            GadgetMode::Unbound => FunctionSet::EMPTY,
            GadgetMode::Multi => FunctionSet::of(&[
                UsbFunction::Network,
                UsbFunction::MassStorage,
                UsbFunction::Serial,
            ]),
            GadgetMode::StorageReadWrite | GadgetMode::StorageReadOnly => {
                FunctionSet::of(&[UsbFunction::MassStorage])
            }
            GadgetMode::NetworkOnly => FunctionSet::of(&[UsbFunction::Network]),
            GadgetMode::HidKeyboard => FunctionSet::of(&[UsbFunction::Hid]),
        }
    }

    /// Read-only flag actually applied to the mass storage LUN
    ///
    /// The storage-only modes fix the flag; `Multi` honours the request;
    /// modes without mass storage record `false`.
    pub const fn effective_read_only(self, requested: bool) -> bool {
        match self {
            GadgetMode::StorageReadOnly => true,
            GadgetMode::StorageReadWrite => false,
            GadgetMode::Multi => requested,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GadgetMode::Unbound => "unbound",
            GadgetMode::Multi => "multi",
            GadgetMode::StorageReadWrite => "storage_read_write",
            GadgetMode::StorageReadOnly => "storage_read_only",
            GadgetMode::NetworkOnly => "network_only",
            GadgetMode::HidKeyboard => "hid_keyboard",
        }
    }
}

impl fmt::Display for GadgetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GadgetMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "unbound" | "none" => Ok(GadgetMode::Unbound),
            "multi" => Ok(GadgetMode::Multi),
            "storage_read_write" | "storage_rw" => Ok(GadgetMode::StorageReadWrite),
            "storage_read_only" | "storage_ro" => Ok(GadgetMode::StorageReadOnly),
            "network_only" | "network" => Ok(GadgetMode::NetworkOnly),
            "hid_keyboard" | "hid" => Ok(GadgetMode::HidKeyboard),
            other => Err(format!("unknown gadget mode: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_sets() {
        let multi = GadgetMode::Multi.functions();
        assert!(multi.contains(UsbFunction::Network));
        assert!(multi.contains(UsbFunction::MassStorage));
        assert!(multi.contains(UsbFunction::Serial));
        assert!(!multi.contains(UsbFunction::Hid));

        let hid = GadgetMode::HidKeyboard.functions();
        assert_eq!(hid.iter().collect::<Vec<_>>(), vec![UsbFunction::Hid]);

        assert!(GadgetMode::Unbound.functions().is_empty());
        assert_eq!(
            GadgetMode::StorageReadOnly.functions(),
            GadgetMode::StorageReadWrite.functions()
        );
    }

    #[test]
    fn test_effective_read_only() {
        assert!(GadgetMode::StorageReadOnly.effective_read_only(false));
        assert!(!GadgetMode::StorageReadWrite.effective_read_only(true));
        assert!(GadgetMode::Multi.effective_read_only(true));
        assert!(!GadgetMode::NetworkOnly.effective_read_only(true));
    }

    #[test]
    fn test_parse_and_serialize() {
        assert_eq!("storage-ro".parse::<GadgetMode>(), Ok(GadgetMode::StorageReadOnly));
        assert_eq!("HID_KEYBOARD".parse::<GadgetMode>(), Ok(GadgetMode::HidKeyboard));
        assert!("ether".parse::<GadgetMode>().is_err());

        let json = serde_json::to_string(&GadgetMode::NetworkOnly).unwrap();
        assert_eq!(json, "\"network_only\"");

        let set = serde_json::to_string(&GadgetMode::Multi.functions()).unwrap();
        assert_eq!(set, r#"["network","mass_storage","serial"]"#);
    }
}
