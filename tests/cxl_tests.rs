//! Integration tests for the CXL.mem hop policies.

use cxl_memsim::common::{CxlCmd, Fault, MemCmd, Packet, PacketId};
use cxl_memsim::soc::cxl::{CxlDevice, CxlHostBridge};
use cxl_memsim::soc::traits::HopPolicy;

const BASE: u64 = 0x1_0000_0000;

fn create_bridge() -> CxlHostBridge {
    CxlHostBridge {
        bridge_lat: 50,
        proto_lat: 12,
    }
}

fn create_device() -> CxlDevice {
    CxlDevice { proto_lat: 15 }
}

/// Tests that the bridge tags CXL requests and charges protocol latency.
#[test]
fn test_bridge_tags_cxl_requests() {
    let bridge = create_bridge();

    let (rd, cycles) = bridge.request_hop(Packet::read(PacketId(1), BASE, 64, 0)).unwrap();
    assert_eq!(rd.cxl(), Some(CxlCmd::M2SReq));
    assert_eq!(cycles, 62);

    let wr = Packet::write(PacketId(2), BASE + 64, vec![1; 64], 0);
    let (wr, _) = bridge.request_hop(wr).unwrap();
    assert_eq!(wr.cxl(), Some(CxlCmd::M2SRwD));
}

/// Tests that posted writes and swaps cross the bridge untagged.
#[test]
fn test_bridge_leaves_untaggable_requests() {
    let bridge = create_bridge();
    let posted = Packet::write(PacketId(1), BASE, vec![0; 8], 0).posted();
    let (posted, _) = bridge.request_hop(posted).unwrap();
    assert_eq!(posted.cxl(), None);

    let swap = Packet::swap(PacketId(2), BASE, vec![0; 8], None, 0);
    let (swap, cycles) = bridge.request_hop(swap).unwrap();
    assert_eq!(swap.cxl(), None);
    assert_eq!(cycles, 62);
}

/// Tests that the device tags responses by kind and strips nothing else.
#[test]
fn test_device_tags_responses() {
    let device = create_device();

    let rd = Packet::read(PacketId(1), BASE, 64, 0).with_cxl(CxlCmd::M2SReq).unwrap();
    let (rd, cycles) = device.request_hop(rd).unwrap();
    assert_eq!(cycles, 15);
    let (resp, cycles) = device.response_hop(rd.into_response().unwrap()).unwrap();
    assert_eq!(resp.cmd(), MemCmd::ReadResp);
    assert_eq!(resp.cxl(), Some(CxlCmd::S2MDRS));
    assert_eq!(cycles, 15);

    let wr = Packet::write(PacketId(2), BASE, vec![0; 64], 0);
    let (ack, _) = device.response_hop(wr.into_response().unwrap()).unwrap();
    assert_eq!(ack.cxl(), Some(CxlCmd::S2MNDR));

    assert_eq!(device.atomic_cycles(&ack), 30);
}

/// Tests that the device refuses a response-class tag on a request.
#[test]
fn test_device_rejects_s2m_request() {
    let device = create_device();
    let resp = Packet::read(PacketId(3), BASE, 64, 0)
        .into_response()
        .unwrap()
        .with_cxl(CxlCmd::S2MDRS)
        .unwrap();
    let err = device.request_hop(resp).unwrap_err();
    assert_eq!(
        err,
        Fault::CommandMismatch {
            id: PacketId(3),
            cmd: MemCmd::ReadResp,
            tag: CxlCmd::S2MDRS,
        }
    );
}

/// Tests that the bridge strips S2M tags and refuses M2S tags on responses.
#[test]
fn test_bridge_response_tags() {
    let bridge = create_bridge();
    let device = create_device();

    let wr = Packet::write(PacketId(1), BASE, vec![0; 64], 0);
    let (ack, _) = device.response_hop(wr.into_response().unwrap()).unwrap();
    let (ack, cycles) = bridge.response_hop(ack).unwrap();
    assert_eq!(ack.cxl(), None);
    assert_eq!(cycles, 62);

    let req = Packet::read(PacketId(2), BASE, 64, 0).with_cxl(CxlCmd::M2SReq).unwrap();
    let err = bridge.response_hop(req).unwrap_err();
    assert!(matches!(err, Fault::CommandMismatch { tag: CxlCmd::M2SReq, .. }));
}
