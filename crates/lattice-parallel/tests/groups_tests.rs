use lattice_interfaces::{CollectiveBackend, DeviceCommunicator, ProcessGroup};
use lattice_parallel::{
    CommunicatorGroupFormer, GroupKind, LocalFabric, LocalWorld, ProcessTopology,
};
use lattice_types::{CommUniqueId, GlobalRank, LatticeError};
use std::time::Duration;

#[derive(Debug)]
struct Formed {
    rank: GlobalRank,
    tensor_rank: usize,
    pipeline_rank: usize,
    tensor_members: Vec<GlobalRank>,
    pipeline_members: Vec<GlobalRank>,
    tensor_gather: Vec<Vec<u8>>,
    previous_stage: Option<GlobalRank>,
    next_stage: Option<GlobalRank>,
}

async fn form_all(tensor_size: usize, pipeline_size: usize) -> Vec<Formed> {
    let world = LocalWorld::new(tensor_size * pipeline_size).unwrap();
    let results = world
        .run(move |handles| async move {
            let topology = ProcessTopology::new(
                handles.world.size(),
                handles.rank,
                tensor_size,
                pipeline_size,
            )?;
            let groups =
                CommunicatorGroupFormer::new(&topology, handles.world.clone(), handles.backend)
                    .form()
                    .await?;
            assert_eq!(groups.tensor.kind(), GroupKind::Tensor);

            let payload = vec![handles.rank.get() as u8];
            let tensor_gather = groups.tensor.communicator().all_gather(&payload).await?;

            Ok(Formed {
                rank: handles.rank,
                tensor_rank: groups.tensor.rank(),
                pipeline_rank: groups.pipeline.rank(),
                tensor_members: groups.tensor.members().to_vec(),
                pipeline_members: groups.pipeline.members().to_vec(),
                tensor_gather,
                previous_stage: groups.previous_stage,
                next_stage: groups.next_stage,
            })
        })
        .await
        .unwrap();
    results.into_iter().map(Result::unwrap).collect()
}

#[tokio::test]
async fn two_by_two_group_membership() {
    let formed = form_all(2, 2).await;
    assert_eq!(formed.len(), 4);

    let rank2 = &formed[2];
    assert_eq!(rank2.rank, GlobalRank::new(2));
    assert_eq!((rank2.tensor_rank, rank2.pipeline_rank), (0, 1));
    assert_eq!(rank2.tensor_members, vec![GlobalRank::new(2), GlobalRank::new(3)]);
    assert_eq!(rank2.pipeline_members, vec![GlobalRank::new(0), GlobalRank::new(2)]);
    assert_eq!(rank2.tensor_gather, vec![vec![2], vec![3]]);
    assert_eq!(rank2.previous_stage, Some(GlobalRank::new(0)));
    assert_eq!(rank2.next_stage, None);
}

#[tokio::test]
async fn groups_follow_grid_rows_and_columns() {
    let (tensor_size, pipeline_size) = (3, 2);
    let formed = form_all(tensor_size, pipeline_size).await;

    for a in &formed {
        assert_eq!(a.tensor_rank, a.rank.get() % tensor_size);
        assert_eq!(a.pipeline_rank, a.rank.get() / tensor_size);
        for b in &formed {
            let same_row = a.rank.get() / tensor_size == b.rank.get() / tensor_size;
            let same_column = a.rank.get() % tensor_size == b.rank.get() % tensor_size;
            assert_eq!(a.tensor_members.contains(&b.rank), same_row);
            assert_eq!(a.pipeline_members.contains(&b.rank), same_column);
        }
    }
}

#[tokio::test]
async fn single_rank_world_forms_trivial_groups() {
    let formed = form_all(1, 1).await;
    assert_eq!(formed[0].tensor_members, vec![GlobalRank::new(0)]);
    assert_eq!(formed[0].pipeline_members, vec![GlobalRank::new(0)]);
    assert_eq!(formed[0].previous_stage, None);
}

#[tokio::test]
async fn failed_rank_releases_blocked_peers() {
    let world = LocalWorld::new(3).unwrap();
    let results = world
        .run(|handles| async move {
            if handles.rank.get() == 1 {
                return Err(LatticeError::engine("forward failed"));
            }
            handles.world.barrier().await
        })
        .await
        .unwrap();

    assert!(matches!(results[1], Err(LatticeError::Engine { .. })));
    for rank in [0, 2] {
        match &results[rank] {
            Err(LatticeError::Communication { message }) => {
                assert!(message.contains("aborted"), "{}", message)
            }
            other => panic!("rank {} expected abort, got {:?}", rank, other),
        }
    }
    assert!(world.fabric().is_aborted());
}

#[tokio::test]
async fn panicking_rank_releases_lower_ranks() {
    let world = LocalWorld::new(3).unwrap();
    let run = world.run(|handles| async move {
        if handles.rank.get() == 2 {
            panic!("rank 2 lost its device");
        }
        handles.world.barrier().await
    });
    let results = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("ranks 0 and 1 stayed blocked after rank 2 panicked")
        .unwrap();

    assert!(matches!(results[2], Err(LatticeError::Internal { .. })));
    for rank in [0, 1] {
        assert!(
            matches!(results[rank], Err(LatticeError::Communication { .. })),
            "rank {}: {:?}",
            rank,
            results[rank]
        );
    }
    let reason = world.fabric().abort_reason().unwrap();
    assert!(reason.contains("P2 panicked"), "{}", reason);
}

#[tokio::test]
async fn seed_broadcast_reaches_every_rank() {
    let world = LocalWorld::new(4).unwrap();
    let results = world
        .run(|handles| async move {
            let local = if handles.rank.is_coordinator() { 0xfeed } else { 7 };
            handles.world.broadcast_u64(local, 0).await
        })
        .await
        .unwrap();
    for seed in results {
        assert_eq!(seed.unwrap(), 0xfeed);
    }
}

#[tokio::test]
async fn communicator_join_rejects_inconsistent_handshake() {
    let fabric = LocalFabric::new(2).unwrap();
    let backend = fabric.collective_backend();
    let id = CommUniqueId::random();

    assert!(backend.init_rank(&id, 2, 2).await.is_err());

    let first = {
        let backend = backend.clone();
        let id = id.clone();
        tokio::spawn(async move { backend.init_rank(&id, 2, 0).await })
    };
    // Rank 0 registers the id before this task resumes.
    tokio::task::yield_now().await;
    let mismatched = backend.init_rank(&id, 3, 1).await;
    assert!(matches!(mismatched, Err(LatticeError::Communication { .. })));
    let duplicate = backend.init_rank(&id, 2, 0).await;
    assert!(matches!(duplicate, Err(LatticeError::Communication { .. })));

    let second = backend.init_rank(&id, 2, 1).await.unwrap();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.rank(), 0);
    assert_eq!(second.size(), 2);
    assert_eq!(first.unique_id(), second.unique_id());
}
