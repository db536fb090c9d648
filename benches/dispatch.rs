use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use sas_mpi::payload::{DeviceRegisterReq, DeviceResp, TaskCompletionResp};
use sas_mpi::type_alias::{DeviceId, PhyId, PortId, Tag};
use sas_mpi::*;

struct NullClient;

impl TransportClient for NullClient {
    fn task_done(&self, _: Tag, _: TaskOutcome) {}
    fn phy_event(&self, _: PhyId, _: PhyChange) {}
    fn port_detached(&self, _: PortId) {}
    fn nexus_lost(&self, _: DeviceId) {}
    fn query_task(&self, _: Tag) -> TaskPresence {
        TaskPresence::Absent
    }
    fn control_done(&self, _: Tag, _: ControlResponse) {}
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let (adapter, mut fw) = Adapter::attach(&AttachConfig::default(), Arc::new(NullClient));

    // Register one device through the real handshake.
    let dev = adapter
        .device_found(0, DeviceKind::SasEnd, [0xA; 8], 0)
        .unwrap();
    let (_, payload) = fw.inbound[0].pop().unwrap();
    let req = DeviceRegisterReq::decode(&payload);
    let mut resp = [0u8; 60];
    DeviceResp {
        tag: req.tag,
        status: 0,
        device_handle: 0x200,
    }
    .encode(&mut resp);
    assert!(fw.outbound[0].push(OutboundOpcode::DeviceRegister.raw(), &resp));
    adapter.interrupt();

    c.bench_function("ssp_submit_complete", |b| {
        b.iter(|| {
            let tag = adapter
                .submit_task(
                    0,
                    dev,
                    TaskRequest::Ssp {
                        dir: DataDir::In,
                        data_len: 4096,
                        lun: [0; 8],
                        cdb: [0x28; 16],
                    },
                )
                .unwrap();
            fw.inbound[0].pop().unwrap();

            let mut payload = [0u8; 60];
            TaskCompletionResp {
                tag,
                status: 0,
                param: 0,
            }
            .encode(&mut payload);
            assert!(fw.outbound[0].push(OutboundOpcode::SspCompletion.raw(), &payload));
            adapter.interrupt();
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
