#![no_main]

use frankenengine_ast_integrity::ast::NodeKind;
use frankenengine_ast_integrity::parent_consistency::check_parent_consistency;
use frankenengine_ast_integrity::syntax_arena::{NodeHandle, SyntaxArena};
use libfuzzer_sys::fuzz_target;

const MAX_STEPS: usize = 256;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    run_arena_program(data);
});

/// Interprets `data` as a sequence of arena mutations. Programs that only
/// use `attach_child` and `push_empty_slot` build consistent trees and must
/// pass; any other program must finish without panicking.
fn run_arena_program(data: &[u8]) {
    let mut arena = SyntaxArena::default();
    let mut handles: Vec<NodeHandle> = Vec::new();
    let mut raw_mutation = false;

    let root = match arena.alloc(NodeKind::CompilationUnit, "root", None) {
        Ok(handle) => handle,
        Err(_) => return,
    };
    handles.push(root);

    for chunk in data.chunks(3).take(MAX_STEPS) {
        let op = byte(chunk, 0);
        let a = pick(&handles, byte(chunk, 1));
        let b = pick(&handles, byte(chunk, 2));
        match op % 6 {
            0 | 1 => {
                let kind = NodeKind::ALL[usize::from(byte(chunk, 1)) % NodeKind::ALL.len()];
                let Ok(child) = arena.alloc(kind, "", None) else {
                    break;
                };
                if arena.attach_child(a, child).is_err() {
                    break;
                }
                handles.push(child);
            }
            2 => {
                let _ = arena.push_empty_slot(a);
            }
            3 => {
                raw_mutation = true;
                let _ = arena.set_parent(a, b);
            }
            // Slots only point at later handles, so no cycles can form.
            4 if a.index() < b.index() => {
                raw_mutation = true;
                let _ = arena.insert_child_unlinked(a, b);
            }
            4 => {}
            _ => {
                raw_mutation = true;
                let _ = arena.clear_parent(a);
            }
        }
    }

    let before = arena.canonical_hash().ok();
    let result = check_parent_consistency(&arena, Some(root));
    assert_eq!(arena.canonical_hash().ok(), before);

    if !raw_mutation {
        assert!(result.is_ok());
    }
}

fn pick(handles: &[NodeHandle], selector: u8) -> NodeHandle {
    handles[usize::from(selector) % handles.len()]
}

fn byte(data: &[u8], index: usize) -> u8 {
    data.get(index).copied().unwrap_or(0)
}
