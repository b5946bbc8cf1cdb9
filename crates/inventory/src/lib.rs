//! Device inventory domain (event-sourced).
//!
//! Pure domain logic: the unit status machine, IMEI uniqueness claims and the
//! movement ledger. No IO, no storage.

pub mod device;
pub mod imei;
pub mod movement;

pub use device::{
    ChangeDeviceStatus, DeleteDevice, DeviceCommand, DeviceCondition, DeviceDeleted,
    DeviceDetails, DeviceDetailsUpdated, DeviceEvent, DeviceMoved, DeviceRegistered,
    DeviceStatus, DeviceType, DeviceUnit, DeviceUnitId, DeviceView, LoanDevice, RegisterDevice,
    ReturnDevice, SellDevice, Transition, TransferDevice, UpdateDeviceDetails,
};
pub use imei::{ClaimImei, Imei, ImeiClaim, ImeiClaimEvent, ImeiClaimed};
pub use movement::{InventoryMovement, MovementType, replay_status};
