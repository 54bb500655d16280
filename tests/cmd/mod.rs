mod build;
mod fixture;
mod new;
mod publish;
mod restore;
mod run;
