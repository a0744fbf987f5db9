use std::sync::Arc;

use alloy_primitives::{keccak256, Address, Bytes, U256};
use gatevm_asm::{
    init_logger, test_utils::MemoryBackend, ExitCode, Interpreter, InterpreterError, Limits,
    Opcode, Program, Request,
};

fn word(x: U256) -> Bytes {
    Bytes::from(x.to_be_bytes::<32>())
}

fn interpreter() -> Interpreter<MemoryBackend> {
    Interpreter::new(Arc::new(MemoryBackend::new()))
}

/// Evaluates `program` and returns its final stack.
async fn run(program: Program) -> Vec<Bytes> {
    let eval = interpreter().eval_program(&program).await.unwrap();
    assert_eq!(eval.exit_code, ExitCode::Success);
    eval.resolve_stack().await.unwrap()
}

async fn top(program: Program) -> Bytes {
    run(program).await.pop().unwrap()
}

#[tokio::test]
async fn test_literals_are_padded_words() {
    init_logger();
    assert_eq!(top(Program::new().push(U256::ZERO)).await, word(U256::ZERO));
    assert_eq!(
        top(Program::new().push(U256::from(0x1234))).await,
        word(U256::from(0x1234))
    );
    assert_eq!(top(Program::new().push(U256::MAX)).await, word(U256::MAX));
}

#[tokio::test]
async fn test_arithmetic() {
    let pair = |a: u64, b: u64| Program::new().push(U256::from(a)).push(U256::from(b));
    assert_eq!(top(pair(7, 5).plus()).await, word(U256::from(12)));
    assert_eq!(top(pair(7, 5).times()).await, word(U256::from(35)));
    assert_eq!(top(pair(7, 5).divide()).await, word(U256::from(1)));
    assert_eq!(top(pair(7, 5).modulo()).await, word(U256::from(2)));
    assert_eq!(top(pair(7, 5).subtract()).await, word(U256::from(2)));
    assert_eq!(top(pair(0, 1).subtract()).await, word(U256::MAX));
    assert_eq!(top(pair(3, 9).min()).await, word(U256::from(3)));
    assert_eq!(top(pair(3, 9).max()).await, word(U256::from(9)));
    assert_eq!(top(pair(9, 3).min()).await, word(U256::from(3)));
}

#[tokio::test]
async fn test_arithmetic_wraps() {
    let program = Program::new().push(U256::MAX).push(U256::from(1)).plus();
    assert_eq!(top(program).await, word(U256::ZERO));

    let program = Program::new().push(U256::MAX).push(U256::from(2)).times();
    assert_eq!(top(program).await, word(U256::MAX - U256::from(1)));
}

#[tokio::test]
async fn test_division_by_zero() {
    for program in [
        Program::new().push(U256::from(1)).push(U256::ZERO).divide(),
        Program::new().push(U256::from(1)).push(U256::ZERO).modulo(),
    ] {
        let err = interpreter().eval_program(&program).await.unwrap_err();
        assert!(matches!(err, InterpreterError::DivisionByZero));
    }
}

#[tokio::test]
async fn test_bitwise() {
    let pair = |a: u64, b: u64| Program::new().push(U256::from(a)).push(U256::from(b));
    assert_eq!(top(pair(0b1100, 0b1010).and()).await, word(U256::from(0b1000)));
    assert_eq!(top(pair(0b1100, 0b1010).or()).await, word(U256::from(0b1110)));
    assert_eq!(top(pair(0b1100, 0b1010).xor()).await, word(U256::from(0b0110)));
    assert_eq!(top(Program::new().push(U256::ZERO).not()).await, word(U256::MAX));

    let one = || Program::new().push(U256::from(1));
    assert_eq!(top(one().shl(U256::from(8))).await, word(U256::from(256)));
    assert_eq!(
        top(one().shl(U256::from(255))).await,
        word(U256::from(1) << 255usize)
    );
    assert_eq!(top(one().shl(U256::from(256))).await, word(U256::ZERO));
    assert_eq!(
        top(Program::new().push(U256::from(256)).shr(U256::from(4))).await,
        word(U256::from(16))
    );
    assert_eq!(top(one().shr(U256::from(300))).await, word(U256::ZERO));
}

#[tokio::test]
async fn test_comparisons() {
    let pair = |a: u64, b: u64| Program::new().push(U256::from(a)).push(U256::from(b));
    let t = word(U256::from(1));
    let f = word(U256::ZERO);
    assert_eq!(top(pair(1, 2).lt()).await, t);
    assert_eq!(top(pair(1, 2).gt()).await, f);
    assert_eq!(top(pair(2, 2).eq()).await, t);
    assert_eq!(top(pair(2, 3).neq()).await, t);
    assert_eq!(top(pair(2, 2).lte()).await, t);
    assert_eq!(top(pair(1, 2).gte()).await, f);
    assert_eq!(top(Program::new().push(U256::ZERO).is_zero()).await, t);
    assert_eq!(top(Program::new().push_str("").is_zero()).await, t);
    assert_eq!(top(Program::new().push_str("a").is_zero()).await, f);
}

#[tokio::test]
async fn test_stack_ops() {
    let abc = || {
        Program::new()
            .push(U256::from(1))
            .push(U256::from(2))
            .push(U256::from(3))
    };
    let words = |xs: &[u64]| xs.iter().map(|x| word(U256::from(*x))).collect::<Vec<_>>();

    assert_eq!(run(abc().swap(2)).await, words(&[3, 2, 1]));
    assert_eq!(run(abc().swap(1)).await, words(&[1, 3, 2]));
    assert_eq!(run(abc().dup(0)).await, words(&[1, 2, 3, 3]));
    assert_eq!(run(abc().dup(2)).await, words(&[1, 2, 3, 1]));
    assert_eq!(run(abc().pop()).await, words(&[1, 2]));
    assert_eq!(run(abc().push_stack(0)).await, words(&[1, 2, 3, 1]));
    assert_eq!(run(abc().push_stack_size()).await, words(&[1, 2, 3, 3]));
    assert_eq!(run(abc().dup2()).await, words(&[1, 2, 3, 2, 3]));
}

#[tokio::test]
async fn test_stack_errors() {
    let err = interpreter()
        .eval_program(&Program::new().pop())
        .await
        .unwrap_err();
    assert!(matches!(err, InterpreterError::StackUnderflow));

    let err = interpreter()
        .eval_program(&Program::new().push(U256::from(1)).dup(1))
        .await
        .unwrap_err();
    assert!(matches!(err, InterpreterError::StackUnderflow));

    let err = interpreter()
        .eval_program(&Program::new().push(U256::from(1)).push_stack(1))
        .await
        .unwrap_err();
    assert!(matches!(err, InterpreterError::StackOverflow));
}

#[tokio::test]
async fn test_stack_overflow_stops_evaluation() {
    let backend = MemoryBackend::with_limits(Limits {
        max_stack_size: 4,
        ..Default::default()
    });
    let interp = Interpreter::new(Arc::new(backend));
    let mut program = Program::new();
    for i in 0..5u64 {
        program = program.push(U256::from(i));
    }
    let program = program.read(1);
    let err = interp.eval_program(&program).await.unwrap_err();
    assert!(matches!(err, InterpreterError::StackOverflow));
    assert_eq!(interp.backend().reads(), 0);
}

#[tokio::test]
async fn test_byte_ops() {
    assert_eq!(
        top(Program::new().push_str("hello").length()).await,
        word(U256::from(5))
    );
    assert_eq!(
        top(Program::new().push_str("ab").push_str("cd").concat()).await,
        Bytes::from_static(b"abcd")
    );
    assert_eq!(
        top(Program::new().push_str("abc").keccak()).await,
        Bytes::from(keccak256(b"abc").0)
    );
    assert_eq!(
        top(Program::new().push_str("abcdef").slice(1, 3)).await,
        Bytes::from_static(b"bcd")
    );
    // past the end is zero-padded
    assert_eq!(
        top(Program::new().push_str("abcdef").slice(4, 4)).await,
        Bytes::from_static(b"ef\0\0")
    );
    assert_eq!(
        top(Program::new().push_str("abc").slice(10, 2)).await,
        Bytes::from_static(b"\0\0")
    );
}

#[tokio::test]
async fn test_assemble_limit() {
    let backend = MemoryBackend::with_limits(Limits {
        max_assemble_bytes: 4,
        ..Default::default()
    });
    let interp = Interpreter::new(Arc::new(backend));

    let program = Program::new().push_str("abc").push_str("de").concat();
    let err = interp.eval_program(&program).await.unwrap_err();
    assert!(matches!(err, InterpreterError::TooManyBytes { limit: 4, .. }));

    let program = Program::new().push_str("abc").slice(0, 5);
    let err = interp.eval_program(&program).await.unwrap_err();
    assert!(matches!(err, InterpreterError::TooManyBytes { limit: 4, .. }));

    let err = interp
        .eval_program(&Program::new().push_str("abcde"))
        .await
        .unwrap_err();
    assert!(matches!(err, InterpreterError::TooManyBytes { limit: 4, .. }));
}

#[tokio::test]
async fn test_registers() {
    let a = Address::with_last_byte(0xaa);
    let stack = run(Program::new()
        .set_target(a)
        .set_slot(U256::from(9))
        .push_target()
        .push_slot())
    .await;
    assert_eq!(stack, vec![Bytes::copy_from_slice(a.as_slice()), word(U256::from(9))]);

    // TARGET resets the slot
    let stack = run(Program::new()
        .set_slot(U256::from(9))
        .set_target(a)
        .push_slot())
    .await;
    assert_eq!(stack, vec![word(U256::ZERO)]);
}

#[tokio::test]
async fn test_outputs() {
    let request = Request::new(2)
        .then(|p| p.push_str("x").set_output(1).push_output(1).push_output(0));
    let eval = interpreter().eval_request(&request).await.unwrap();
    assert_eq!(
        eval.resolve_outputs().await.unwrap(),
        vec![Bytes::new(), Bytes::from_static(b"x")]
    );
    assert_eq!(
        eval.resolve_stack().await.unwrap(),
        vec![Bytes::from_static(b"x"), Bytes::new()]
    );

    let request = Request::new(1).then(|p| p.push(U256::from(1)).set_output(1));
    let err = interpreter().eval_request(&request).await.unwrap_err();
    assert!(matches!(err, InterpreterError::InvalidOutputIndex(1)));
}

#[tokio::test]
async fn test_malformed_programs() {
    let err = interpreter()
        .eval_encoded_request(Bytes::from_static(&[0, 33]))
        .await
        .unwrap_err();
    assert!(matches!(err, InterpreterError::UnknownOpcode(33)));

    let err = interpreter()
        .eval_encoded_request(Bytes::from_static(&[0, 5, 1, 2]))
        .await
        .unwrap_err();
    assert!(matches!(err, InterpreterError::ReaderOverflow { wanted: 5, .. }));

    let err = interpreter()
        .eval_encoded_request(Bytes::new())
        .await
        .unwrap_err();
    assert!(matches!(err, InterpreterError::ReaderOverflow { .. }));
}

#[tokio::test]
async fn test_debug_is_a_no_op() {
    let program = Program::new().push(U256::from(1)).debug("here").unwrap();
    assert_eq!(run(program).await, vec![word(U256::from(1))]);
}

#[tokio::test]
async fn test_stats() {
    let program = Program::new()
        .push(U256::from(1))
        .push(U256::from(2))
        .plus()
        .push(U256::from(3))
        .plus();
    let eval = interpreter().eval_program(&program).await.unwrap();
    assert_eq!(eval.stats.count(Opcode::Plus), 2);
    assert_eq!(eval.stats.literals(), 3);
    assert_eq!(eval.stats.total(), 5);
}
