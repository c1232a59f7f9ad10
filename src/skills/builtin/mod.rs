pub mod code_exec;

pub use code_exec::ExecuteCodeSkill;
