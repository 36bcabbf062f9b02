use clap::Parser;
use training::{run, TripletArgs};

fn main() -> anyhow::Result<()> {
    run(TripletArgs::parse())
}
