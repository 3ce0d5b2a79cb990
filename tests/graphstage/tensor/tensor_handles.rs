use anyhow::Result;
use graphstage::{DType, Error, HostBuffer, Shape};

use crate::common;

fn round_trip(data: HostBuffer) -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let handle = device.send(&data)?;
    assert_eq!(handle.shape(), data.shape());
    let back = handle.to_host()?;
    assert_eq!(back.bytes(), data.bytes(), "{}", data.shape());
    Ok(())
}

#[test]
fn handle_round_trip_every_dtype() -> Result<()> {
    round_trip(HostBuffer::of_bool(&[true, false, true], vec![3])?)?;
    round_trip(HostBuffer::of::<i32>(&[-2, 0, 7], vec![3])?)?;
    round_trip(HostBuffer::of::<i64>(&[i64::MIN, 0, i64::MAX], vec![3])?)?;
    round_trip(HostBuffer::of::<u32>(&[0, 1, u32::MAX], vec![3])?)?;
    round_trip(HostBuffer::of::<u64>(&[0, 1, u64::MAX], vec![3])?)?;
    round_trip(HostBuffer::of::<f32>(&[-1.5, 0.0, 3.25], vec![3])?)?;
    round_trip(HostBuffer::of::<f64>(&[-1.5, 0.0, 3.25], vec![3])?)?;
    Ok(())
}

#[test]
fn send_rejects_unsupported_dtype() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let shape = Shape::new(DType::Bf16, vec![2]);
    let data = HostBuffer::from_bytes(shape, vec![0u8; 4])?;
    match device.send(&data) {
        Err(Error::UnsupportedDType { dtype, .. }) => assert_eq!(dtype, DType::Bf16),
        other => panic!("expected UnsupportedDType, got {other:?}"),
    }
    Ok(())
}

#[test]
fn platform_has_exactly_one_device() {
    let platform = common::platform();
    assert!(platform.device(0).is_ok());
    assert!(platform.device(1).is_err());
}

#[test]
fn transfer_to_same_device_keeps_data() -> Result<()> {
    let platform = common::platform();
    let device = common::device(&platform)?;
    let data = HostBuffer::of::<f32>(&[1.0, 2.0], vec![2])?;
    let handle = device.send(&data)?;
    let moved = handle.to_device(&device)?;
    assert_eq!(moved.to_host()?.bytes(), data.bytes());
    // The original stays valid after the transfer.
    assert_eq!(handle.to_host()?.bytes(), data.bytes());
    Ok(())
}
