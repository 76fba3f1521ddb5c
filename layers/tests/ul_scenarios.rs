//! End-to-end uplink scenarios through the MAC UL processor

use bytes::Bytes;
use common::executor::{ManualExecutor, RoundRobinUeExecutorMapper, TaskExecutor, WorkerExecutor};
use common::types::{DuCellIndex, DuUeIndex, LcgId, Lcid, Rnti, SlotPoint};
use interfaces::{
    BsrFormat, LcgBsrReport, MacLogicalChannelConfig, MacRxDataIndication, MacRxPdu, MacRxSdu,
    MacSduRxNotifier, MacUeControlNotifier, MacUeCreateRequest, SchedulerUlFeedbackHandler,
    UlBsrIndication, UlCcchIndication, UlPhrIndication, UlSrIndication,
};
use layers::mac::bsr::buff_size_field_to_bytes;
use layers::mac::{DlBufferPoolConfig, MacCellConfig, MacConfig, MacUlDependencies, MacUlProcessor};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Default)]
struct SchedSpy {
    bsrs: Mutex<Vec<UlBsrIndication>>,
    phrs: Mutex<Vec<UlPhrIndication>>,
    srs: Mutex<Vec<UlSrIndication>>,
}

impl SchedulerUlFeedbackHandler for SchedSpy {
    fn handle_ul_bsr_indication(&self, bsr: UlBsrIndication) {
        self.bsrs.lock().push(bsr);
    }
    fn handle_ul_phr_indication(&self, phr: UlPhrIndication) {
        self.phrs.lock().push(phr);
    }
    fn handle_sr_indication(&self, sr: UlSrIndication) {
        self.srs.lock().push(sr);
    }
}

#[derive(Default)]
struct UeCtrlSpy {
    ccch: Mutex<Vec<UlCcchIndication>>,
    crnti_ces: Mutex<Vec<DuUeIndex>>,
}

impl MacUeControlNotifier for UeCtrlSpy {
    fn on_ul_ccch_msg_received(&self, msg: UlCcchIndication) {
        self.ccch.lock().push(msg);
    }
    fn on_crnti_ce_received(&self, old_ue_index: DuUeIndex) {
        self.crnti_ces.lock().push(old_ue_index);
    }
}

#[derive(Default)]
struct SduSpy(Mutex<Vec<MacRxSdu>>);

impl MacSduRxNotifier for SduSpy {
    fn on_new_sdu(&self, sdu: MacRxSdu) {
        self.0.lock().push(sdu);
    }
}

fn test_config() -> MacConfig {
    MacConfig {
        cells: vec![MacCellConfig {
            cell_index: DuCellIndex(0),
            dl_buffer_pool: DlBufferPoolConfig {
                nof_descriptors: 64,
                descriptor_len: 128,
                initial_cache_size: 16,
                low_water_mark: 4,
                high_water_mark: 16,
                replenish_batch: 4,
            },
        }],
        nof_harqs_per_ue: 8,
    }
}

struct TestBench {
    mac_ul: MacUlProcessor,
    workers: Vec<Arc<ManualExecutor>>,
    sched: Arc<SchedSpy>,
    ue_ctrl: Arc<UeCtrlSpy>,
}

impl TestBench {
    fn new(nof_workers: usize) -> Self {
        let workers: Vec<_> = (0..nof_workers)
            .map(|i| Arc::new(ManualExecutor::new(format!("ue-{}", i), 64)))
            .collect();
        let sched = Arc::new(SchedSpy::default());
        let ue_ctrl = Arc::new(UeCtrlSpy::default());
        let deps = MacUlDependencies {
            ue_exec_mapper: Arc::new(RoundRobinUeExecutorMapper::new(
                workers.iter().map(|w| w.clone() as Arc<dyn TaskExecutor>).collect(),
            )),
            bg_executor: Arc::new(ManualExecutor::new("bg", 16)),
            sched: sched.clone(),
            ue_ctrl_notifier: ue_ctrl.clone(),
        };
        Self {
            mac_ul: MacUlProcessor::new(test_config(), deps).unwrap(),
            workers,
            sched,
            ue_ctrl,
        }
    }

    fn add_ue(&self, ue_index: u16, rnti: u16, lcids: &[u8]) -> Arc<SduSpy> {
        let sink = Arc::new(SduSpy::default());
        let bearers = lcids
            .iter()
            .map(|&lcid| MacLogicalChannelConfig {
                lcid: Lcid(lcid),
                ul_bearer: sink.clone(),
            })
            .collect();
        assert!(self.mac_ul.add_ue(MacUeCreateRequest {
            ue_index: DuUeIndex(ue_index),
            cell_index: DuCellIndex(0),
            crnti: Rnti(rnti),
            bearers,
        }));
        sink
    }

    fn rx(&self, rnti: u16, payload: &'static [u8]) {
        self.mac_ul.handle_rx_data_indication(MacRxDataIndication {
            sl_rx: SlotPoint::new(100, 7),
            cell_index: DuCellIndex(0),
            pdus: vec![MacRxPdu {
                rnti: Rnti(rnti),
                harq_id: 1,
                payload: Bytes::from_static(payload),
            }],
        });
    }

    fn run_all(&self) {
        while self.workers.iter().map(|w| w.run_pending()).sum::<usize>() > 0 {}
    }
}

#[test]
fn test_short_bsr_reaches_scheduler() {
    let bench = TestBench::new(2);
    bench.add_ue(0, 0x4601, &[1]);

    // Short BSR, LCG 2, level 25
    bench.rx(0x4601, &[0x3d, (2 << 5) | 25]);
    assert!(bench.sched.bsrs.lock().is_empty());
    bench.run_all();

    let bsrs = bench.sched.bsrs.lock();
    assert_eq!(bsrs.len(), 1);
    assert_eq!(bsrs[0].ue_index, DuUeIndex(0));
    assert_eq!(
        bsrs[0].reported_lcgs,
        vec![LcgBsrReport {
            lcg_id: LcgId(2),
            nof_bytes: buff_size_field_to_bytes(25, BsrFormat::ShortBsr),
        }]
    );
    assert!(bench.sched.srs.lock().is_empty());
}

#[test]
fn test_crnti_ce_dispatches_on_named_ue_context() {
    let bench = TestBench::new(2);
    // UE 0 on worker 0 is the known UE, UE 1 on worker 1 is the RA attempt
    bench.add_ue(0, 0x4601, &[1]);
    bench.add_ue(1, 0x4602, &[]);

    bench.rx(0x4602, &[0x3a, 0x46, 0x01, 0x3d, (5 << 5) | 3]);
    assert_eq!(bench.workers[1].run_pending(), 1);
    // Continuation queued on UE 0's context
    assert!(bench.sched.bsrs.lock().is_empty());
    assert_eq!(bench.workers[0].pending(), 1);
    assert_eq!(bench.workers[0].run_pending(), 1);

    let bsrs = bench.sched.bsrs.lock();
    assert_eq!(bsrs.len(), 1);
    assert_eq!(bsrs[0].ue_index, DuUeIndex(0));
    assert_eq!(bsrs[0].crnti, Rnti(0x4601));
    assert_eq!(bsrs[0].reported_lcgs[0].lcg_id, LcgId(5));

    let srs = bench.sched.srs.lock();
    assert_eq!(srs.len(), 1);
    assert_eq!(srs[0].ue_index, DuUeIndex(0));
    assert_eq!(*bench.ue_ctrl.crnti_ces.lock(), vec![DuUeIndex(1)]);
}

#[test]
fn test_crnti_ce_from_unknown_tc_rnti() {
    let bench = TestBench::new(2);
    let sink = bench.add_ue(1, 0x4601, &[1]);

    // TC-RNTI 0x4700 has no UE, its PDU still carries data for UE 1
    bench.rx(0x4700, &[0x3a, 0x46, 0x01, 0x01, 0x02, 0xca, 0xfe]);
    bench.run_all();

    assert!(bench.ue_ctrl.crnti_ces.lock().is_empty());
    let sdus = sink.0.lock();
    assert_eq!(sdus.len(), 1);
    assert_eq!(sdus[0].rnti, Rnti(0x4601));
    assert_eq!(&sdus[0].payload[..], &[0xca, 0xfe]);
    assert_eq!(bench.sched.srs.lock().len(), 1);
}

#[test]
fn test_ccch_from_unknown_identity() {
    let bench = TestBench::new(1);

    bench.rx(0x4601, &[0x00, 1, 2, 3, 4, 5, 6, 7, 8, 0x3d, 0x21]);
    bench.rx(0x4601, &[0x00, 9, 9, 9, 9, 9, 9, 9, 9]);
    bench.run_all();

    let ccch = bench.ue_ctrl.ccch.lock();
    assert_eq!(ccch.len(), 1);
    assert_eq!(ccch[0].tc_rnti, Rnti(0x4601));
    assert_eq!(&ccch[0].payload[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert!(bench.sched.bsrs.lock().is_empty());
    drop(ccch);

    // The first message reaches SRB0 of the admitted UE, exactly once
    let sink = bench.add_ue(0, 0x4601, &[0, 1]);
    bench.run_all();
    bench.mac_ul.addmod_bearers(
        DuUeIndex(0),
        &[MacLogicalChannelConfig {
            lcid: Lcid::SRB0,
            ul_bearer: sink.clone(),
        }],
    );
    bench.run_all();

    let sdus = sink.0.lock();
    assert_eq!(sdus.len(), 1);
    assert_eq!(sdus[0].lcid, Lcid::SRB0);
    assert_eq!(&sdus[0].payload[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn test_ccch_flushed_on_late_srb0() {
    let bench = TestBench::new(1);
    bench.rx(0x4601, &[0x34, 1, 2, 3, 4, 5, 6]);
    bench.run_all();

    let sink = bench.add_ue(0, 0x4601, &[1]);
    bench.run_all();
    assert!(sink.0.lock().is_empty());

    assert!(bench.mac_ul.addmod_bearers(
        DuUeIndex(0),
        &[MacLogicalChannelConfig {
            lcid: Lcid::SRB0,
            ul_bearer: sink.clone(),
        }],
    ));
    bench.run_all();
    assert_eq!(sink.0.lock().len(), 1);
}

#[test]
fn test_removed_ue_traffic_is_dropped() {
    let bench = TestBench::new(1);
    let sink = bench.add_ue(0, 0x4601, &[1]);

    bench.rx(0x4601, &[0x01, 0x01, 0xaa]);
    assert!(bench.mac_ul.remove_ue(DuUeIndex(0)));
    bench.run_all();

    assert!(sink.0.lock().is_empty());
    assert_eq!(bench.mac_ul.stats().pdus_discarded, 1);

    let pool = bench.mac_ul.dl_buffer_pool(DuCellIndex(0)).unwrap();
    assert_eq!(pool.nof_ue_descriptors(DuUeIndex(0)), 0);
}

#[test]
fn test_removed_bearer_drops_sdus() {
    let bench = TestBench::new(1);
    let sink = bench.add_ue(0, 0x4601, &[1, 2]);
    assert!(bench.mac_ul.remove_bearers(DuUeIndex(0), &[Lcid(2)]));
    assert!(!bench.mac_ul.remove_bearers(DuUeIndex(5), &[Lcid(2)]));

    bench.rx(0x4601, &[0x01, 0x01, 0xaa, 0x02, 0x01, 0xbb]);
    bench.run_all();

    let sdus = sink.0.lock();
    assert_eq!(sdus.len(), 1);
    assert_eq!(sdus[0].lcid, Lcid(1));
}

#[test]
fn test_pdu_queued_before_admission_runs_on_ue_context() {
    let bench = TestBench::new(2);

    // Routed to the default context while 0x4601 is unknown
    bench.rx(0x4601, &[0x3d, 0x21]);
    bench.add_ue(1, 0x4601, &[1]);

    assert_eq!(bench.workers[0].run_pending(), 1);
    assert!(bench.sched.bsrs.lock().is_empty());
    assert_eq!(bench.workers[1].pending(), 1);

    assert_eq!(bench.workers[1].run_pending(), 1);
    let bsrs = bench.sched.bsrs.lock();
    assert_eq!(bsrs.len(), 1);
    assert_eq!(bsrs[0].ue_index, DuUeIndex(1));
}

#[test]
fn test_ccch_queued_before_admission_reaches_srb0() {
    let bench = TestBench::new(2);

    bench.rx(0x4601, &[0x00, 1, 2, 3, 4, 5, 6, 7, 8]);
    let sink = bench.add_ue(1, 0x4601, &[0, 1]);
    bench.run_all();

    // The UE exists by the time the message is handled, no admission request
    assert!(bench.ue_ctrl.ccch.lock().is_empty());
    let sdus = sink.0.lock();
    assert_eq!(sdus.len(), 1);
    assert_eq!(sdus[0].lcid, Lcid::SRB0);
    assert_eq!(&sdus[0].payload[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn test_reserved_identities_do_not_reach_ues() {
    let bench = TestBench::new(2);
    bench.add_ue(0, 0x4601, &[1]);

    bench.rx(0xffff, &[0x3d, 0x21]);
    bench.rx(0x4601, &[0x3a, 0xff, 0xff, 0x3d, 0x21]);
    bench.rx(0x4601, &[0x3a, 0x00, 0x00]);
    bench.run_all();

    assert!(bench.sched.bsrs.lock().is_empty());
    assert!(bench.sched.srs.lock().is_empty());
    assert_eq!(bench.mac_ul.stats().pdus_discarded, 3);
}

async fn drain(executor: &dyn TaskExecutor) {
    let (tx, rx) = oneshot::channel();
    assert!(executor.execute(Box::new(move || {
        let _ = tx.send(());
    })));
    rx.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_contention_resolution_on_worker_executors() {
    let workers: Vec<Arc<dyn TaskExecutor>> = (0..2)
        .map(|i| Arc::new(WorkerExecutor::spawn(format!("ue-{}", i), 256).0) as Arc<dyn TaskExecutor>)
        .collect();
    let sched = Arc::new(SchedSpy::default());
    let deps = MacUlDependencies {
        ue_exec_mapper: Arc::new(RoundRobinUeExecutorMapper::new(workers.clone())),
        bg_executor: Arc::new(ManualExecutor::new("bg", 16)),
        sched: sched.clone(),
        ue_ctrl_notifier: Arc::new(UeCtrlSpy::default()),
    };
    let mac_ul = MacUlProcessor::new(test_config(), deps).unwrap();

    let sink = Arc::new(SduSpy::default());
    for (ue_index, rnti) in [(0u16, 0x4601u16), (1, 0x4602)] {
        assert!(mac_ul.add_ue(MacUeCreateRequest {
            ue_index: DuUeIndex(ue_index),
            cell_index: DuCellIndex(0),
            crnti: Rnti(rnti),
            bearers: vec![MacLogicalChannelConfig {
                lcid: Lcid(4),
                ul_bearer: sink.clone(),
            }],
        }));
    }

    for i in 0..50u8 {
        mac_ul.handle_rx_data_indication(MacRxDataIndication {
            sl_rx: SlotPoint::new(i as u16, 0),
            cell_index: DuCellIndex(0),
            pdus: vec![
                MacRxPdu {
                    rnti: Rnti(0x4602),
                    harq_id: 0,
                    payload: Bytes::from(vec![0x3a, 0x46, 0x01, 0x04, 0x01, i]),
                },
                MacRxPdu {
                    rnti: Rnti(0x4601),
                    harq_id: 0,
                    payload: Bytes::from(vec![0x3d, 0x21]),
                },
            ],
        });
    }

    for _ in 0..2 {
        for worker in &workers {
            drain(worker.as_ref()).await;
        }
    }

    // Every SDU was delivered under the C-RNTI, in submission order
    let sdus = sink.0.lock();
    assert_eq!(sdus.len(), 50);
    assert!(sdus.iter().all(|sdu| sdu.rnti == Rnti(0x4601)));
    let order: Vec<u8> = sdus.iter().map(|sdu| sdu.payload[0]).collect();
    assert_eq!(order, (0..50).collect::<Vec<u8>>());

    assert_eq!(sched.srs.lock().len(), 50);
    assert!(sched.bsrs.lock().iter().all(|bsr| bsr.ue_index == DuUeIndex(0)));
    assert_eq!(sched.bsrs.lock().len(), 50);
}
