use std::sync::Arc;

use alloy_primitives::{address, keccak256, Address, Bytes, B256, U256};
use gatevm_asm::{
    storage::{solidity_array_slots, solidity_follow_slot},
    test_utils::MemoryBackend,
    ExitCode, Interpreter, InterpreterError, Need, Program, Request, TargetNeed,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

const CONTRACT: Address = address!("51050ec063d393217b436747617ad1c2285aeeee");

fn word(x: U256) -> Bytes {
    Bytes::from(x.to_be_bytes::<32>())
}

fn random_bytes(rng: &mut StdRng, n: usize) -> Vec<u8> {
    (0..n).map(|_| rng.random()).collect()
}

fn setup() -> (Arc<MemoryBackend>, Interpreter<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    backend.deploy(CONTRACT);
    (backend.clone(), Interpreter::new(backend))
}

async fn outputs(interp: &Interpreter<MemoryBackend>, request: Request) -> Vec<Bytes> {
    let eval = interp.eval_request(&request).await.unwrap();
    assert_eq!(eval.exit_code, ExitCode::Success);
    eval.resolve_outputs().await.unwrap()
}

// contract {
//   bytes value;                        // slot 0, 73 bytes
//   mapping(bytes => uint256) values;   // slot 1
// }
#[tokio::test]
async fn test_concat_slice_follow() {
    let (backend, interp) = setup();
    let mut rng = StdRng::seed_from_u64(73);
    let value = random_bytes(&mut rng, 73);
    let key = [&value[..8], &value[68..]].concat();
    let stored = U256::from(0x1337);
    backend.set_bytes(CONTRACT, U256::ZERO, &value);
    backend.set_uint(
        CONTRACT,
        solidity_follow_slot(U256::from(1), &key),
        stored,
    );

    let request = Request::new(0)
        .then(|p| {
            p.set_target(CONTRACT)
                .read_bytes()
                .dup(0)
                .slice(0, 8)
                .dup(1)
                .slice(68, 5)
                .concat()
                .set_slot(U256::from(1))
                .follow()
                .read(1)
        })
        .drain(2)
        .unwrap();

    let eval = interp.eval_request(&request).await.unwrap();
    assert_eq!(eval.exit_code, ExitCode::Success);
    assert_eq!(
        eval.resolve_outputs().await.unwrap(),
        vec![Bytes::from(value), word(stored)]
    );

    // target, header, 3 data slots, mapping slot
    assert_eq!(eval.needs.len(), 6);
    assert!(matches!(
        eval.needs[0],
        Need::Target(TargetNeed { target, required: false }) if target == CONTRACT
    ));
    assert_eq!(eval.needs[1].as_slot(), Some(U256::ZERO));
    let data = solidity_array_slots(U256::ZERO, 3);
    let slots: Vec<_> = eval.needs[2..5].iter().filter_map(Need::as_slot).collect();
    assert_eq!(slots, data);
    assert_eq!(
        eval.needs[5].as_slot(),
        Some(solidity_follow_slot(U256::from(1), &key))
    );
}

#[tokio::test]
async fn test_long_bytes_decode() {
    let (backend, interp) = setup();
    let mut rng = StdRng::seed_from_u64(1);
    for (slot, size) in [(0u64, 32usize), (1, 33), (2, 64), (3, 100), (4, 2048)] {
        let value = random_bytes(&mut rng, size);
        backend.set_bytes(CONTRACT, U256::from(slot), &value);
        let request = Request::new(0)
            .then(|p| p.set_target(CONTRACT).set_slot(U256::from(slot)).read_bytes())
            .add_output()
            .unwrap();
        assert_eq!(outputs(&interp, request).await, vec![Bytes::from(value)]);
    }
}

#[tokio::test]
async fn test_short_bytes_decode() {
    let (backend, interp) = setup();
    backend.set_bytes(CONTRACT, U256::from(5), b"hello");
    backend.set_bytes(CONTRACT, U256::from(6), b"");
    let request = Request::new(0)
        .then(|p| {
            p.set_target(CONTRACT)
                .set_slot(U256::from(5))
                .read_bytes()
                .set_slot(U256::from(6))
                .read_bytes()
        })
        .drain(2)
        .unwrap();
    assert_eq!(
        outputs(&interp, request).await,
        vec![Bytes::from_static(b"hello"), Bytes::new()]
    );
}

#[tokio::test]
async fn test_length_uses_size_hint() {
    let (backend, interp) = setup();
    backend.set_bytes(CONTRACT, U256::ZERO, &[7u8; 100]);
    let program = Program::new().set_target(CONTRACT).read_bytes().length();
    let eval = interp.eval_program(&program).await.unwrap();
    assert_eq!(eval.resolve_stack().await.unwrap(), vec![word(U256::from(100))]);
    // header only, the data slots were never resolved
    assert_eq!(backend.reads(), 1);
}

#[tokio::test]
async fn test_invalid_long_header() {
    let (backend, interp) = setup();
    backend.set_uint(CONTRACT, U256::ZERO, U256::from(10 * 2 + 1));
    let program = Program::new().set_target(CONTRACT).read_bytes();
    let err = interp.eval_program(&program).await.unwrap_err();
    assert!(matches!(err, InterpreterError::InvalidStorageEncoding { .. }));
}

#[tokio::test]
async fn test_provable_limit() {
    let (backend, interp) = setup();
    backend.set_uint(CONTRACT, U256::ZERO, U256::from(3000 * 2 + 1));
    let program = Program::new().set_target(CONTRACT).read_bytes();
    let err = interp.eval_program(&program).await.unwrap_err();
    assert!(matches!(err, InterpreterError::TooManyBytes { limit: 2048, .. }));

    let reads = backend.reads();
    let program = Program::new().set_target(CONTRACT).read(65);
    let err = interp.eval_program(&program).await.unwrap_err();
    assert!(matches!(err, InterpreterError::TooManyBytes { limit: 2048, .. }));
    assert_eq!(backend.reads(), reads);
}

#[tokio::test]
async fn test_read_slots() {
    let (backend, interp) = setup();
    for i in 0..3u64 {
        backend.set_uint(CONTRACT, U256::from(5 + i), U256::from(100 + i));
    }
    let request = Request::new(0)
        .then(|p| {
            p.set_target(CONTRACT)
                .set_slot(U256::from(5))
                .read(3)
                .read(0)
                .push_slot()
        })
        .drain(3)
        .unwrap();
    let expected = [100u64, 101, 102]
        .iter()
        .flat_map(|x| U256::from(*x).to_be_bytes::<32>())
        .collect::<Vec<_>>();
    assert_eq!(
        outputs(&interp, request).await,
        vec![Bytes::from(expected), Bytes::new(), word(U256::from(5))]
    );
}

#[tokio::test]
async fn test_read_array() {
    let (backend, interp) = setup();
    // uint256[] at slot 2
    backend.set_uint(CONTRACT, U256::from(2), U256::from(3));
    let elements = solidity_array_slots(U256::from(2), 3);
    for (i, slot) in elements.iter().enumerate() {
        backend.set_uint(CONTRACT, *slot, U256::from(i + 10));
    }
    // uint8[] of 40 elements at slot 3, 32 per slot
    backend.set_uint(CONTRACT, U256::from(3), U256::from(40));
    let packed = solidity_array_slots(U256::from(3), 2);
    backend.set_word(CONTRACT, packed[0], B256::repeat_byte(1));
    backend.set_word(CONTRACT, packed[1], B256::repeat_byte(2));

    let request = Request::new(0)
        .then(|p| {
            p.set_target(CONTRACT)
                .set_slot(U256::from(2))
                .read_array(32)
                .set_slot(U256::from(3))
                .read_array(1)
        })
        .drain(2)
        .unwrap();
    let out = outputs(&interp, request).await;

    let mut expected = U256::from(3).to_be_bytes::<32>().to_vec();
    for i in 0..3u64 {
        expected.extend(U256::from(i + 10).to_be_bytes::<32>());
    }
    assert_eq!(out[0], Bytes::from(expected));

    let mut expected = U256::from(40).to_be_bytes::<32>().to_vec();
    expected.extend([1u8; 32]);
    expected.extend([2u8; 32]);
    assert_eq!(out[1], Bytes::from(expected));

    let err = interp
        .eval_program(&Program::new().set_target(CONTRACT).read_array(0))
        .await
        .unwrap_err();
    assert!(matches!(err, InterpreterError::InvalidElementSize));
}

#[tokio::test]
async fn test_hashed_bytes() {
    let (backend, interp) = setup();
    let supplied = Bytes::from_static(b"supplied by the target");
    backend.supply(CONTRACT, U256::from(1), supplied.clone());
    backend.set_bytes(CONTRACT, U256::from(2), &[9u8; 40]);

    let request = Request::new(0)
        .then(|p| {
            p.set_target(CONTRACT)
                .set_slot(U256::from(1))
                .push_bytes(keccak256(&supplied).as_slice())
                .read_hashed_bytes()
                .set_slot(U256::from(2))
                .push(U256::ZERO)
                .read_hashed_bytes()
        })
        .drain(2)
        .unwrap();
    let eval = interp.eval_request(&request).await.unwrap();
    assert_eq!(
        eval.resolve_outputs().await.unwrap(),
        vec![supplied.clone(), Bytes::from(vec![9u8; 40])]
    );

    let hashed: Vec<_> = eval
        .needs
        .iter()
        .filter_map(|need| match need {
            Need::Hashed(need) => Some(need.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(hashed.len(), 2);
    assert_eq!(
        hashed[0].hash.resolve().await.unwrap(),
        Bytes::from(keccak256(&supplied).0)
    );
    assert_eq!(hashed[0].value.resolve().await.unwrap(), supplied);
}

#[tokio::test]
async fn test_follow_equivalence() {
    let (_, interp) = setup();
    let key = U256::from(0xdead);
    let a = Program::new()
        .set_slot(U256::from(3))
        .push(key)
        .follow()
        .push_slot();
    let b = Program::new()
        .set_slot(U256::from(3))
        .push(key)
        .push_slot()
        .concat()
        .keccak()
        .slot()
        .push_slot();
    let a = interp.eval_program(&a).await.unwrap();
    let b = interp.eval_program(&b).await.unwrap();
    assert_eq!(
        a.resolve_stack().await.unwrap(),
        b.resolve_stack().await.unwrap()
    );
    assert_eq!(
        a.slot,
        solidity_follow_slot(U256::from(3), &key.to_be_bytes::<32>())
    );
}

#[tokio::test]
async fn test_offset_equivalence() {
    let (_, interp) = setup();
    let a = Program::new()
        .set_slot(U256::from(3))
        .offset(U256::from(5))
        .push_slot();
    let b = Program::new()
        .set_slot(U256::from(3))
        .push_slot()
        .push(U256::from(5))
        .plus()
        .slot()
        .push_slot();
    let a = interp.eval_program(&a).await.unwrap();
    let b = interp.eval_program(&b).await.unwrap();
    assert_eq!(a.slot, U256::from(8));
    assert_eq!(a.slot, b.slot);
    assert_eq!(
        a.resolve_stack().await.unwrap(),
        b.resolve_stack().await.unwrap()
    );
}

#[tokio::test]
async fn test_follow_index() {
    let (backend, interp) = setup();
    // uint256[] at slot 4, element 2
    let slot = solidity_array_slots(U256::from(4), 3)[2];
    backend.set_uint(CONTRACT, slot, U256::from(77));
    let request = Request::new(0)
        .then(|p| {
            p.set_target(CONTRACT)
                .set_slot(U256::from(4))
                .push(U256::from(2))
                .follow_index()
                .read(1)
        })
        .add_output()
        .unwrap();
    assert_eq!(outputs(&interp, request).await, vec![word(U256::from(77))]);
}

#[tokio::test]
async fn test_determinism() {
    let (backend, interp) = setup();
    let mut rng = StdRng::seed_from_u64(7);
    backend.set_bytes(CONTRACT, U256::ZERO, &random_bytes(&mut rng, 200));
    let request = Request::new(0)
        .then(|p| p.set_target(CONTRACT).read_bytes().dup(0).keccak())
        .drain(2)
        .unwrap();
    let a = interp.eval_request(&request).await.unwrap();
    let b = interp.eval_request(&request).await.unwrap();
    assert_eq!(a.exit_code, b.exit_code);
    assert_eq!(
        a.resolve_outputs().await.unwrap(),
        b.resolve_outputs().await.unwrap()
    );
}
