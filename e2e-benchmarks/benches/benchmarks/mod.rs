pub mod benchtemplate;
pub mod executebench;
pub mod translatebench;
