mod run;

pub use run::Runner;
