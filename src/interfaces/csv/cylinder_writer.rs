use crate::domain::account::AccountId;
use crate::domain::cylinder::{Cylinder, CylinderId, CylinderStatus};
use crate::domain::order::OrderId;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct CylinderRecord<'a> {
    id: CylinderId,
    serial_number: &'a str,
    status: CylinderStatus,
    vendor_id: AccountId,
    is_assigned: bool,
    current_order_id: Option<OrderId>,
}

impl<'a> From<&'a Cylinder> for CylinderRecord<'a> {
    fn from(cylinder: &'a Cylinder) -> Self {
        Self {
            id: cylinder.id,
            serial_number: &cylinder.serial_number,
            status: cylinder.status,
            vendor_id: cylinder.vendor_id,
            is_assigned: cylinder.is_assigned(),
            current_order_id: cylinder.current_order_id,
        }
    }
}

/// Writes cylinders as `id,serial_number,status,vendor_id,is_assigned,current_order_id`.
pub struct CylinderWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CylinderWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_cylinders<'a>(
        &mut self,
        cylinders: impl IntoIterator<Item = &'a Cylinder>,
    ) -> Result<()> {
        for cylinder in cylinders {
            self.writer.serialize(CylinderRecord::from(cylinder))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
