//! Customer and device descriptions shared by bookings and repairs.

use serde::{Deserialize, Serialize};

use repairdesk_core::error::{ensure_max_len, ensure_present};
use repairdesk_core::DomainResult;
use repairdesk_inventory::{DeviceType, Imei};
use repairdesk_parties::PartyId;

const LABEL_MAX: usize = 64;
const NAME_MAX: usize = 200;

/// Who brings the device in: a registered customer or a walk-in described inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CustomerRef {
    Registered {
        customer_id: PartyId,
    },
    WalkIn {
        name: String,
        phone: Option<String>,
        email: Option<String>,
    },
}

impl CustomerRef {
    pub fn registered_id(&self) -> Option<PartyId> {
        match self {
            CustomerRef::Registered { customer_id } => Some(*customer_id),
            CustomerRef::WalkIn { .. } => None,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        match self {
            CustomerRef::Registered { .. } => Ok(()),
            CustomerRef::WalkIn { name, phone, email } => {
                ensure_present("customer name", name, NAME_MAX)?;
                if let Some(phone) = phone {
                    ensure_max_len("customer phone", phone, 32)?;
                }
                if let Some(email) = email {
                    ensure_max_len("customer email", email, 254)?;
                }
                Ok(())
            }
        }
    }
}

/// The device as described at intake. Not linked to an inventory unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescription {
    pub device_type: DeviceType,
    pub brand: String,
    pub model: String,
    pub imei: Option<Imei>,
    pub serial_number: Option<String>,
    pub color: Option<String>,
}

impl DeviceDescription {
    pub fn validate(&self) -> DomainResult<()> {
        ensure_present("brand", &self.brand, LABEL_MAX)?;
        ensure_present("model", &self.model, LABEL_MAX)?;
        if let Some(serial) = &self.serial_number {
            ensure_max_len("serial_number", serial, LABEL_MAX)?;
        }
        if let Some(color) = &self.color {
            ensure_max_len("color", color, LABEL_MAX)?;
        }
        Ok(())
    }
}
