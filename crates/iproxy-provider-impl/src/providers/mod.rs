pub mod doubao;
pub mod gitee;
pub mod huggingface;
pub mod modelscope;
pub mod pollinations;

mod util;
