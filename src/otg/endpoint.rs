//! UDC endpoint budget

use crate::error::{AppError, Result};

/// Default endpoint count for typical UDCs (dwc2 exposes more, musb fewer)
pub const DEFAULT_MAX_ENDPOINTS: u8 = 16;

/// Tracks endpoints claimed by the functions of one configuration
#[derive(Debug, Clone)]
pub struct EndpointAllocator {
    max_endpoints: u8,
    used_endpoints: u8,
}

impl EndpointAllocator {
    pub fn new(max_endpoints: u8) -> Self {
        Self {
            max_endpoints,
            used_endpoints: 0,
        }
    }

    /// Claim `count` endpoints for `function`
    pub fn allocate(&mut self, function: &str, count: u8) -> Result<()> {
        if !self.can_allocate(count) {
            return Err(AppError::Internal(format!(
                "Not enough endpoints for {}: need {}, available {}",
                function,
                count,
                self.available()
            )));
        }
        self.used_endpoints += count;
        Ok(())
    }

    pub fn available(&self) -> u8 {
        self.max_endpoints.saturating_sub(self.used_endpoints)
    }

    pub fn used(&self) -> u8 {
        self.used_endpoints
    }

    pub fn max(&self) -> u8 {
        self.max_endpoints
    }

    pub fn can_allocate(&self, count: u8) -> bool {
        self.available() >= count
    }
}

impl Default for EndpointAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENDPOINTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_function_budget() {
        // ecm (3) + mass storage (2) + acm (3)
        let mut alloc = EndpointAllocator::new(8);
        alloc.allocate("ecm.usb0", 3).unwrap();
        alloc.allocate("mass_storage.usb0", 2).unwrap();
        alloc.allocate("acm.usb0", 3).unwrap();
        assert_eq!(alloc.available(), 0);

        let err = alloc.allocate("hid.usb0", 1).unwrap_err();
        assert!(err.to_string().contains("hid.usb0"));
    }
}
