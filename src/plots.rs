use plotters::coord::Shift;
use plotters::prelude::*;

/// Draws the per-minibatch loss history on a log-scale y axis.
pub fn plot_loss_curve<DB>(
    losses: &[f32],
    drawing_area: &DrawingArea<DB, Shift>,
) -> Result<(), Box<dyn std::error::Error>>
where
    DB: DrawingBackend,
    <DB as DrawingBackend>::ErrorType: 'static,
{
    drawing_area.fill(&WHITE)?;

    let max_loss = losses
        .iter()
        .cloned()
        .reduce(f32::max)
        .ok_or("no losses recorded")?;

    let mut chart_builder = ChartBuilder::on(drawing_area);

    let mut chart_context = chart_builder
        .caption("training loss", ("Arial", 20))
        .set_all_label_area_size(70)
        .margin(50)
        .build_cartesian_2d(0..losses.len(), (0f32..max_loss).log_scale())?;

    chart_context
        .configure_mesh()
        .x_labels(10)
        .x_desc("Minibatch")
        .y_labels(10)
        .y_desc("loss")
        .y_label_formatter(&|y| format!("{:.1e}", y))
        .draw()?;

    let curve = LineSeries::new(
        losses.iter().enumerate().map(|(i, &loss)| (i, loss)),
        BLUE.filled(),
    );

    chart_context.draw_series(curve)?;

    Ok(())
}
